//! Constants used throughout the session core
//! UUIDs, persistence keys, timeouts and channel sizes.

use uuid::Uuid;

/// Key under which the id of the last successfully connected peripheral is stored
pub const LAST_CONNECTED_UUID_KEY: &str = "ACBlueToothUUIDKey";

/// Generic Access service, used as the default local service
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);

/// Default read-only characteristic of the local service
pub const UUID_DEFAULT_READ_CHAR: Uuid = Uuid::from_u128(0x0bd51666_e7cb_469b_8e4d_2742f1ba77cc);

/// Local name put in the advertisement by default
pub const DEFAULT_LOCAL_NAME: &str = "virtual";

/// Timeout for the connect step in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Timeout for each discovery step in seconds
pub const DISCOVERY_TIMEOUT_SECS: u64 = 10;

/// Timeout for enabling notifications in seconds
pub const SUBSCRIBE_TIMEOUT_SECS: u64 = 10;

/// Capacity of each inbound radio event queue
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the observer broadcast channel
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 128;

/// Capacity of the command queue feeding the coordinator
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

/// RSSI recorded when the radio does not report one. Never replaces a real reading.
pub const UNKNOWN_RSSI: i16 = i16::MIN;
