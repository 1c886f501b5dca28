use std::collections::{BTreeSet, HashMap};

use log::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: String,
    pub name: String,
    pub service_ids: BTreeSet<Uuid>,
}

/// Devices seen during the current scan pass, one entry per address.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Inserts or replaces the record for `address`.
    pub fn record(&mut self, address: &str, name: &str, service_ids: impl IntoIterator<Item = Uuid>) {
        let key = normalize_address(address);
        let record = DeviceRecord {
            address: key.clone(),
            name: name.to_string(),
            service_ids: service_ids.into_iter().collect(),
        };
        debug!("Recorded device {} ({})", record.address, record.name);
        self.devices.insert(key, record);
    }

    /// Records advertising exactly `name`, ordered by address.
    pub fn matches(&self, name: &str) -> Vec<DeviceRecord> {
        let mut found: Vec<DeviceRecord> = self
            .devices
            .values()
            .filter(|d| d.name == name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.address.cmp(&b.address));
        found
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Bluetooth addresses compare case-insensitively.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_uppercase()
}
