//! BLE session core
//! Device discovery, the outbound connection state machine, the local
//! advertiser and the coordinator that ties them to a radio.

mod adapter;
mod advertiser;
#[cfg(feature = "bluest")]
mod bluest_radio;
mod connection;
mod constants;
mod coordinator;
mod events;
mod notification;
mod radio;
mod registry;
mod scanner;
mod selection;
pub mod sim;
mod types;

pub use adapter::{AdapterStateMachine, AllowedActions, UserPrompt};
pub use advertiser::PeripheralAdvertiser;
#[cfg(feature = "bluest")]
pub use bluest_radio::BluestRadio;
pub use connection::{CentralSession, StepTimeouts};
pub use constants::*;
pub use coordinator::{Command, CoordinatorHandle, SessionCoordinator, SessionSnapshot};
pub use events::{CentralEvent, DataEvent, EventQueues, EventSinks, PeripheralEvent, SessionEvent, event_queues};
pub use notification::data_event;
pub use radio::Radio;
pub use registry::{DeviceRegistry, Upsert};
pub use scanner::BluetoothScanner;
pub use selection::{FirstDiscovered, PreferredUuids, SelectionStrategy};
pub use types::{
    AdapterState, AdvertisementPayload, CharacteristicProperties, ConnectionSession, ConnectionState,
    GattOperation, LocalCharacteristic, LocalService, PeripheralId, PeripheralRecord, RequestTag,
    RestoredPeripheral,
};
