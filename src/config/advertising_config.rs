use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{
    CharacteristicProperties, DEFAULT_LOCAL_NAME, LocalCharacteristic, UUID_DEFAULT_READ_CHAR,
    UUID_GENERIC_ACCESS_SERVICE,
};

/// The local GATT service and how it is advertised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    pub service_id: Uuid,
    pub local_name: String,
    pub characteristics: Vec<LocalCharacteristic>,

    /// Start advertising once the peripheral role is powered on.
    pub auto_start: bool,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        AdvertisingConfig {
            service_id: UUID_GENERIC_ACCESS_SERVICE,
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            characteristics: vec![LocalCharacteristic::new(
                UUID_DEFAULT_READ_CHAR,
                CharacteristicProperties::READ,
            )],
            auto_start: true,
        }
    }
}
