use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt as _;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::TransportError;
use crate::registry::normalize_address;

/// What a nearby device announced during discovery.
#[derive(Clone, Debug)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
    pub service_ids: Vec<Uuid>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Listens for advertisements for `window` and returns everything seen.
    async fn discover(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Opens a link to `address` whose writes target `characteristic`.
    async fn connect(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> Result<Arc<dyn Link>, TransportError>;
}

/// An open link to the wearable.
#[async_trait]
pub trait Link: Send + Sync {
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Arranges for `flag` to be tripped when the peripheral drops the link.
    async fn on_disconnect(&self, flag: DisconnectFlag) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Set while the link is up. Only the transport's disconnect notification clears it.
#[derive(Clone, Debug)]
pub struct DisconnectFlag {
    connected: Arc<AtomicBool>,
    address: String,
}

impl DisconnectFlag {
    pub fn new(address: &str) -> Self {
        DisconnectFlag {
            connected: Arc::new(AtomicBool::new(true)),
            address: address.to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn trip(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("Disconnected from {}", self.address);
        }
    }
}

pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    pub fn new(adapter: Adapter) -> Self {
        BtleTransport { adapter }
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let wanted = normalize_address(address);
        for peripheral in self.adapter.peripherals().await? {
            if normalize_address(&peripheral.address().to_string()) == wanted {
                return Ok(peripheral);
            }
        }
        Err(TransportError::PeripheralNotFound(address.to_string()))
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn discover(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(window).await;

        let seen = collect_advertisements(&self.adapter).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Error stopping scan: {:?}", err);
        }
        seen
    }

    async fn connect(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> Result<Arc<dyn Link>, TransportError> {
        let peripheral = self.find_peripheral(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let Some(characteristic) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
        else {
            if let Err(err) = peripheral.disconnect().await {
                debug!("Error disconnecting from {}: {:?}", address, err);
            }
            return Err(TransportError::CharacteristicMissing(characteristic));
        };

        Ok(Arc::new(BtleLink {
            adapter: self.adapter.clone(),
            peripheral,
            characteristic,
            watcher: Mutex::new(None),
        }))
    }
}

async fn collect_advertisements(adapter: &Adapter) -> Result<Vec<Advertisement>, TransportError> {
    let mut seen = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let properties = peripheral.properties().await?;
        let (name, service_ids) = properties
            .map(|p| (p.local_name, p.services))
            .unwrap_or_default();
        seen.push(Advertisement {
            address: peripheral.address().to_string(),
            name,
            service_ids,
        });
    }
    Ok(seen)
}

struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristic: Characteristic,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BtleLink {
    fn replace_watcher(&self, handle: Option<JoinHandle<()>>) {
        let mut watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = std::mem::replace(&mut *watcher, handle) {
            old.abort();
        }
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn write(&self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.peripheral.is_connected().await? {
            return Err(TransportError::LinkClosed);
        }
        self.peripheral
            .write(&self.characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn on_disconnect(&self, flag: DisconnectFlag) -> Result<(), TransportError> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let flag_on_register = flag.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        flag.trip();
                        return;
                    }
                }
            }
            // The adapter went away, so the link is gone as well.
            flag.trip();
        });
        self.replace_watcher(Some(handle));

        // The link may have dropped before we subscribed.
        if !self.peripheral.is_connected().await? {
            flag_on_register.trip();
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.replace_watcher(None);
    }
}
