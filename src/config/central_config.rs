use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{
    CONNECT_TIMEOUT_SECS, DISCOVERY_TIMEOUT_SECS, FirstDiscovered, PreferredUuids, SUBSCRIBE_TIMEOUT_SECS,
    SelectionStrategy, StepTimeouts,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Only peripherals advertising one of these services are reported. Empty scans for everything.
    pub scan_services: Vec<Uuid>,

    /// Start scanning as soon as the adapter reports powered on.
    pub auto_scan: bool,

    /// Ask the settings navigator to open the Bluetooth page when the adapter is off.
    pub open_settings_on_power_off: bool,

    /// Service to pick after discovery; the first discovered one when absent or not offered.
    pub preferred_service: Option<Uuid>,

    /// Characteristic to subscribe to; same fallback as `preferred_service`.
    pub preferred_characteristic: Option<Uuid>,

    pub connect_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub subscribe_timeout_secs: u64,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            scan_services: Vec::new(),
            auto_scan: true,
            open_settings_on_power_off: true,
            preferred_service: None,
            preferred_characteristic: None,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            discovery_timeout_secs: DISCOVERY_TIMEOUT_SECS,
            subscribe_timeout_secs: SUBSCRIBE_TIMEOUT_SECS,
        }
    }
}

impl CentralConfig {
    pub fn step_timeouts(&self) -> StepTimeouts {
        StepTimeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            discovery: Duration::from_secs(self.discovery_timeout_secs),
            subscribe: Duration::from_secs(self.subscribe_timeout_secs),
        }
    }

    pub fn selection_strategy(&self) -> Box<dyn SelectionStrategy> {
        if self.preferred_service.is_none() && self.preferred_characteristic.is_none() {
            Box::new(FirstDiscovered)
        } else {
            Box::new(PreferredUuids {
                service: self.preferred_service,
                characteristic: self.preferred_characteristic,
            })
        }
    }
}
