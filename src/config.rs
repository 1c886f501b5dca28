use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;
use uuid::Uuid;

pub const DEFAULT_DEVICE_NAME: &str = "STLB250";
pub const DEFAULT_HAPTIC_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x20000000_0001_11e1_ac36_0002a5d5c51b);

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub device: Option<DeviceConfig>,
    pub scan: Option<ScanConfig>,
    pub feedback: Option<FeedbackConfig>,
    pub detection: Option<DetectionConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DeviceConfig {
    pub name: Option<String>,
    /// When set, only a device advertising from this address is accepted.
    pub address: Option<MacAddress>,
    pub haptic_characteristic: Option<Uuid>,
}

impl DeviceConfig {
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string())
    }

    pub fn haptic_characteristic(&self) -> Uuid {
        self.haptic_characteristic
            .unwrap_or(DEFAULT_HAPTIC_CHARACTERISTIC)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub scan_window_seconds: Option<u64>,
    pub rescan_delay_seconds: Option<u64>,
    pub liveness_poll_seconds: Option<u64>,
}

impl ScanConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_seconds.unwrap_or(5))
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_secs(self.rescan_delay_seconds.unwrap_or(10))
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_secs(self.liveness_poll_seconds.unwrap_or(3))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FeedbackConfig {
    pub queue_capacity: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

impl FeedbackConfig {
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(3).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(1000))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DetectionConfig {
    pub hand_label: Option<String>,
    pub target_label: Option<String>,
    pub min_confidence: Option<f32>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    /// Frames without a target sighting before the cached target is dropped.
    /// Unset means the cached target never expires.
    pub target_ttl_frames: Option<u32>,
}

impl DetectionConfig {
    pub fn hand_label(&self) -> String {
        self.hand_label.clone().unwrap_or_else(|| "hand".to_string())
    }

    pub fn target_label(&self) -> String {
        self.target_label
            .clone()
            .unwrap_or_else(|| "apple".to_string())
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence.unwrap_or(0.5)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (
            self.frame_width.unwrap_or(1280),
            self.frame_height.unwrap_or(720),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [device]
            name = "STLB250"
            address = "C0:CC:BB:AA:AA:AA"
            haptic_characteristic = "20000000-0001-11e1-ac36-0002a5d5c51b"

            [scan]
            scan_window_seconds = 4
            rescan_delay_seconds = 10
            liveness_poll_seconds = 3

            [feedback]
            queue_capacity = 3
            poll_interval_ms = 250

            [detection]
            target_label = "cup"
            min_confidence = 0.6
            target_ttl_frames = 30
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        let device = config.device.unwrap();
        assert_eq!(device.name(), "STLB250");
        assert_eq!(
            device.address.map(|a| a.to_string()),
            Some("C0:CC:BB:AA:AA:AA".to_string())
        );
        assert_eq!(device.haptic_characteristic(), DEFAULT_HAPTIC_CHARACTERISTIC);
        assert_eq!(config.scan.unwrap().scan_window(), Duration::from_secs(4));
        assert_eq!(
            config.feedback.unwrap().poll_interval(),
            Duration::from_millis(250)
        );
        let detection = config.detection.unwrap();
        assert_eq!(detection.target_label(), "cup");
        assert_eq!(detection.hand_label(), "hand");
        assert_eq!(detection.target_ttl_frames, Some(30));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::de::from_str("").unwrap();
        let scan = config.scan.unwrap_or_default();
        assert_eq!(scan.rescan_delay(), Duration::from_secs(10));
        assert_eq!(scan.liveness_poll(), Duration::from_secs(3));
        let feedback = config.feedback.unwrap_or_default();
        assert_eq!(feedback.queue_capacity(), 3);
        assert_eq!(feedback.poll_interval(), Duration::from_secs(1));
        let detection = config.detection.unwrap_or_default();
        assert_eq!(detection.frame_size(), (1280, 720));
        assert!(detection.target_ttl_frames.is_none());
        assert_eq!(
            config.device.unwrap_or_default().name(),
            DEFAULT_DEVICE_NAME
        );
    }
}
