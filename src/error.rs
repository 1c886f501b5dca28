use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
    #[error("peripheral {0} is not known to the adapter")]
    PeripheralNotFound(String),
    #[error("characteristic {0} is not exposed by the peripheral")]
    CharacteristicMissing(Uuid),
    #[error("link closed")]
    LinkClosed,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("no active link")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures the connection manager absorbs by backing off and scanning again.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no device named {name} found")]
    ScanFailure { name: String },
    #[error("failed to connect to {address}: {source}")]
    ConnectFailure {
        address: String,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("malformed detection frame: {0}")]
    Malformed(#[from] serde_json::Error),
}
