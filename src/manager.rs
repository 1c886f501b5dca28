use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{DeviceConfig, ScanConfig};
use crate::error::{CycleError, WriteError};
use crate::messages::{ConnectionState, FeedbackFrame};
use crate::registry::{DeviceRecord, DeviceRegistry, normalize_address};
use crate::transport::{DisconnectFlag, Link, Transport};

/// State shared between the manager loop and its handles.
struct Shared {
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Arc<dyn Link>>>,
}

impl Shared {
    fn current_link(&self) -> Option<Arc<dyn Link>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_link(&self, link: Option<Arc<dyn Link>>) {
        *self
            .link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = link;
    }
}

/// Cheap, cloneable view of the manager: status queries and feedback writes.
#[derive(Clone)]
pub struct LinkHandle {
    shared: Arc<Shared>,
}

impl LinkHandle {
    pub fn status(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Sends one frame over the current link. Fails without touching the
    /// transport unless the manager reports `Connected`.
    pub async fn write(&self, frame: FeedbackFrame) -> Result<(), WriteError> {
        if self.status() != ConnectionState::Connected {
            return Err(WriteError::NotConnected);
        }
        let link = self.shared.current_link().ok_or(WriteError::NotConnected)?;
        link.write(&frame.as_bytes()).await?;
        Ok(())
    }
}

/// Owns the link to the wearable and keeps it alive: scan, connect, monitor, repeat.
pub struct ConnectionManager<T> {
    transport: T,
    registry: DeviceRegistry,
    device_name: String,
    pinned_address: Option<String>,
    characteristic: Uuid,
    scan_window: Duration,
    rescan_delay: Duration,
    liveness_poll: Duration,
    shared: Arc<Shared>,
}

enum Outcome {
    Continue,
    Shutdown,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, device: &DeviceConfig, scan: &ScanConfig) -> (Self, LinkHandle) {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state,
            link: Mutex::new(None),
        });

        (
            ConnectionManager {
                transport,
                registry: DeviceRegistry::new(),
                device_name: device.name(),
                pinned_address: device
                    .address
                    .map(|address| normalize_address(&address.to_string())),
                characteristic: device.haptic_characteristic(),
                scan_window: scan.scan_window(),
                rescan_delay: scan.rescan_delay(),
                liveness_poll: scan.liveness_poll(),
                shared: shared.clone(),
            },
            LinkHandle { shared },
        )
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting connection manager for {}", self.device_name);

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Outcome::Shutdown = self.cycle(&mut shutdown).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped");
    }

    /// One scan -> connect -> monitor pass.
    async fn cycle(&mut self, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let scanned = tokio::select! {
            res = self.scan() => res,
            _ = shutdown.changed() => return Outcome::Shutdown,
        };
        let device = match scanned {
            Ok(device) => device,
            Err(err) => {
                info!("{}, retrying in {:?}", err, self.rescan_delay);
                return pause(self.rescan_delay, shutdown).await;
            }
        };

        // Connect runs to completion; shutdown is honoured at the next pause.
        let (link, flag) = match self.connect(&device).await {
            Ok(connected) => connected,
            Err(err) => {
                warn!("{}, rescanning in {:?}", err, self.rescan_delay);
                self.set_state(ConnectionState::Scanning);
                return pause(self.rescan_delay, shutdown).await;
            }
        };

        while flag.is_connected() {
            if let Outcome::Shutdown = pause(self.liveness_poll, shutdown).await {
                self.close(link).await;
                return Outcome::Shutdown;
            }
        }

        info!("Link to {} lost, scanning again", device.address);
        self.set_state(ConnectionState::Disconnected);
        self.shared.set_link(None);
        Outcome::Continue
    }

    async fn scan(&mut self) -> Result<DeviceRecord, CycleError> {
        self.set_state(ConnectionState::Scanning);
        debug!("Scanning for {} for {:?}", self.device_name, self.scan_window);

        let no_match = || CycleError::ScanFailure {
            name: self.device_name.clone(),
        };

        self.registry.clear();
        let advertisements = match self.transport.discover(self.scan_window).await {
            Ok(advertisements) => advertisements,
            Err(err) => {
                warn!("Discovery failed: {}", err);
                return Err(no_match());
            }
        };
        for advertisement in advertisements {
            if let Some(name) = advertisement.name {
                self.registry
                    .record(&advertisement.address, &name, advertisement.service_ids);
            }
        }
        if self.registry.is_empty() {
            debug!("No named devices nearby");
        } else {
            debug!("{} named devices nearby", self.registry.len());
        }

        let device = self
            .registry
            .matches(&self.device_name)
            .into_iter()
            .find(|d| {
                self.pinned_address
                    .as_ref()
                    .is_none_or(|pinned| *pinned == d.address)
            })
            .ok_or_else(no_match)?;

        info!(
            "Found {} at {} (services: {:?})",
            device.name, device.address, device.service_ids
        );
        Ok(device)
    }

    async fn connect(
        &mut self,
        device: &DeviceRecord,
    ) -> Result<(Arc<dyn Link>, DisconnectFlag), CycleError> {
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", device.address);

        let failed = |source| CycleError::ConnectFailure {
            address: device.address.clone(),
            source,
        };

        let link = self
            .transport
            .connect(&device.address, self.characteristic)
            .await
            .map_err(failed)?;

        let flag = DisconnectFlag::new(&device.address);
        if let Err(err) = link.on_disconnect(flag.clone()).await {
            if let Err(err) = link.disconnect().await {
                debug!("Error disconnecting from {}: {}", device.address, err);
            }
            return Err(failed(err));
        }

        self.shared.set_link(Some(link.clone()));
        self.set_state(ConnectionState::Connected);
        info!("Connected to {} ({})", device.name, device.address);
        Ok((link, flag))
    }

    /// Silences the wearable and drops the link.
    async fn close(&self, link: Arc<dyn Link>) {
        self.set_state(ConnectionState::Disconnected);
        self.shared.set_link(None);
        if let Err(err) = link.write(&FeedbackFrame::OFF.as_bytes()).await {
            warn!("Error turning haptic feedback off: {}", err);
        }
        if let Err(err) = link.disconnect().await {
            warn!("Error disconnecting: {}", err);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }
}

async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> Outcome {
    if *shutdown.borrow() {
        return Outcome::Shutdown;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Outcome::Continue,
        res = shutdown.changed() => {
            if res.is_err() || *shutdown.borrow() {
                Outcome::Shutdown
            } else {
                Outcome::Continue
            }
        }
    }
}
