//! Defines shared data structures for the Bluetooth module.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Power/authorization state reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "powered off",
            Self::PoweredOn => "powered on",
        };
        f.write_str(s)
    }
}

/// Platform-specific unique identifier of a remote peripheral.
///
/// CoreBluetooth hands out UUIDs, BlueZ uses object paths, so the value is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Represents a discovered Bluetooth peripheral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralRecord {
    /// Stable identity of the peripheral; the registry key
    pub id: PeripheralId,
    /// The advertised or GAP name, if available
    pub display_name: Option<String>,
    /// Signal strength of the latest sighting, in dBm
    pub last_rssi: i16,
    /// Service UUIDs seen in advertisements
    pub services_advertised: BTreeSet<Uuid>,
    /// When the peripheral was first seen
    pub discovered_at: DateTime<Utc>,
}

impl PeripheralRecord {
    /// Creates a record stamped with the current time
    pub fn new(id: PeripheralId, display_name: Option<String>, last_rssi: i16) -> Self {
        Self {
            id,
            display_name,
            last_rssi,
            services_advertised: BTreeSet::new(),
            discovered_at: Utc::now(),
        }
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.services_advertised.extend(services);
        self
    }

    /// Name shown in lists: the display name, else the identifier.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Progress of the single outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribing,
    Ready,
    Disconnected,
    Failed,
}

impl ConnectionState {
    /// True between the connect request and the end of subscription.
    pub fn is_establishing(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::DiscoveringServices
                | Self::DiscoveringCharacteristics
                | Self::Subscribing
        )
    }

    /// True while a link to the target is (or is about to be) held.
    pub fn is_active(&self) -> bool {
        self.is_establishing() || *self == Self::Ready
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::DiscoveringServices => "discovering services",
            Self::DiscoveringCharacteristics => "discovering characteristics",
            Self::Subscribing => "subscribing",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The state of the current outbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub target: PeripheralId,
    pub state: ConnectionState,
    pub discovered_service_id: Option<Uuid>,
    pub discovered_characteristic_id: Option<Uuid>,
    pub notify_enabled: bool,
    /// Bumped on every new attempt and on teardown; completions from older generations are dropped.
    pub generation: u64,
}

impl ConnectionSession {
    pub fn new(target: PeripheralId, generation: u64) -> Self {
        Self {
            target,
            state: ConnectionState::Idle,
            discovered_service_id: None,
            discovered_characteristic_id: None,
            notify_enabled: false,
            generation,
        }
    }
}

/// Correlates a radio request with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestTag {
    pub generation: u64,
}

impl RequestTag {
    pub fn new(generation: u64) -> Self {
        Self { generation }
    }
}

/// Access flags of a local characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CharacteristicProperties {
    pub readable: bool,
    pub writable: bool,
}

impl CharacteristicProperties {
    pub const READ: Self = Self { readable: true, writable: false };
    pub const WRITE: Self = Self { readable: false, writable: true };
    pub const READ_WRITE: Self = Self { readable: true, writable: true };
}

/// A characteristic hosted by the local GATT service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCharacteristic {
    pub id: Uuid,
    pub properties: CharacteristicProperties,
    /// A fixed value served for every read. Only allowed on read-only characteristics.
    #[serde(default)]
    pub static_value: Option<Vec<u8>>,
}

impl LocalCharacteristic {
    pub fn new(id: Uuid, properties: CharacteristicProperties) -> Self {
        Self { id, properties, static_value: None }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.static_value = Some(value.into());
        self
    }
}

/// A validated local GATT service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalService {
    pub id: Uuid,
    pub primary: bool,
    pub characteristics: Vec<LocalCharacteristic>,
}

/// What goes into the advertisement packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisementPayload {
    pub local_name: String,
    pub service_ids: Vec<Uuid>,
}

/// A peripheral handed back by the system when the process is relaunched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoredPeripheral {
    pub id: PeripheralId,
    pub display_name: Option<String>,
    /// The radio confirmed the link is still up
    pub connected: bool,
    pub service_id: Option<Uuid>,
    pub characteristic_id: Option<Uuid>,
    pub notifying: bool,
}

/// Which GATT operation produced a data event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GattOperation {
    Read,
    Write,
    Notify,
}
