//! Device domain type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{DeviceId, generate_id};

/// Connectivity status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Unknown device status: {}", s)),
        }
    }
}

/// A handset that hosts SIM cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Number of SIMs provisioned at registration
    pub sim_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Create a new device with a generated ID
    ///
    /// A registered device stays offline until its first heartbeat.
    pub fn new(name: impl Into<String>, sim_count: u32) -> Self {
        let name = name.into();
        Self {
            id: generate_id("dev", Some(&name)),
            name,
            status: DeviceStatus::Offline,
            last_seen: None,
            sim_count,
            created_at: Utc::now(),
        }
    }

    /// Record a heartbeat
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.status = DeviceStatus::Online;
        self.last_seen = Some(at);
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_is_offline_until_touched() {
        let mut device = Device::new("Pixel 7", 2);
        assert_eq!(device.status, DeviceStatus::Offline);
        assert!(device.last_seen.is_none());
        assert!(!device.is_online());

        let at = Utc::now();
        device.touch(at);
        assert!(device.is_online());
        assert_eq!(device.last_seen, Some(at));
    }
}
