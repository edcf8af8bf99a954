//! Event types flowing into and out of the session core
//!
//! The radio pushes central-role and peripheral-role events into two separate
//! queues; the coordinator is their only consumer. Observers receive
//! [`SessionEvent`]s on a broadcast channel of their own.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::adapter::UserPrompt;
use crate::core::bluetooth::types::{
    AdapterState, ConnectionState, GattOperation, PeripheralId, PeripheralRecord, RequestTag,
    RestoredPeripheral,
};
use crate::error::{AdapterNotReady, SessionError};

/// Callbacks of the central role, as reported by the radio
#[derive(Debug, Clone)]
pub enum CentralEvent {
    /// The central manager's power state changed
    PowerStateChanged(AdapterState),
    /// The system relaunched us with connections it kept alive
    WillRestoreState { peripherals: Vec<RestoredPeripheral> },
    /// An advertisement was received
    Discovered {
        id: PeripheralId,
        name: Option<String>,
        rssi: i16,
        services: Vec<Uuid>,
    },
    Connected { id: PeripheralId, tag: RequestTag },
    ConnectFailed { id: PeripheralId, tag: RequestTag, error: String },
    /// Link dropped, by request or not
    Disconnected { id: PeripheralId, error: Option<String> },
    ServicesDiscovered {
        id: PeripheralId,
        tag: RequestTag,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: Uuid,
        tag: RequestTag,
        result: Result<Vec<Uuid>, String>,
    },
    NotifyStateUpdated {
        id: PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        result: Result<bool, String>,
    },
    /// A read completed or a notification arrived
    ValueUpdated {
        id: PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        operation: GattOperation,
        value: Vec<u8>,
        error: Option<String>,
    },
    ValueWritten {
        id: PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        value: Vec<u8>,
        error: Option<String>,
    },
    RssiRead {
        id: PeripheralId,
        tag: RequestTag,
        result: Result<i16, String>,
    },
    NameUpdated { id: PeripheralId, name: Option<String> },
    ServicesModified { id: PeripheralId, invalidated: Vec<Uuid> },
    L2capChannelOpened {
        id: PeripheralId,
        psm: Option<u16>,
        error: Option<String>,
    },
}

/// Callbacks of the peripheral role
#[derive(Debug, Clone)]
pub enum PeripheralEvent {
    /// The peripheral manager's power state changed
    PowerStateChanged(AdapterState),
    ServiceAdded { service: Uuid, error: Option<String> },
    AdvertisingStarted { error: Option<String> },
}

/// Received or written data, as delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEvent {
    pub peripheral: PeripheralId,
    pub characteristic: Uuid,
    pub operation: GattOperation,
    pub payload: Vec<u8>,
    /// The payload as text when it is valid UTF-8
    pub text: Option<String>,
    /// Set when the payload could not be decoded; the session carries on
    pub decode_error: Option<SessionError>,
    /// Per-call failure reported by the radio
    pub error: Option<String>,
}

/// What observers (UI, CLI, daemon) get to see
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    RegistryChanged { devices: Vec<PeripheralRecord> },
    AdapterStateChanged { state: AdapterState },
    AdapterNotReady { reason: AdapterNotReady, prompt: UserPrompt },
    PeripheralAdapterStateChanged { state: AdapterState },
    ConnectionStateChanged {
        peripheral: Option<PeripheralId>,
        state: ConnectionState,
        reason: Option<SessionError>,
    },
    DataReceived(DataEvent),
    RssiUpdated { peripheral: PeripheralId, rssi: i16 },
    ServicesInvalidated { peripheral: PeripheralId, services: Vec<Uuid> },
    L2capChannelOpened {
        peripheral: PeripheralId,
        psm: Option<u16>,
        error: Option<String>,
    },
    AdvertisingStateChanged { advertising: bool, error: Option<String> },
}

/// Sending halves handed to the radio
#[derive(Debug, Clone)]
pub struct EventSinks {
    pub central: mpsc::Sender<CentralEvent>,
    pub peripheral: mpsc::Sender<PeripheralEvent>,
}

impl EventSinks {
    /// Pushes a central event, logging instead of failing when the coordinator is gone.
    pub async fn emit_central(&self, event: CentralEvent) {
        if let Err(e) = self.central.send(event).await {
            log::warn!("Dropping central event, coordinator stopped: {:?}", e.0);
        }
    }

    pub async fn emit_peripheral(&self, event: PeripheralEvent) {
        if let Err(e) = self.peripheral.send(event).await {
            log::warn!("Dropping peripheral event, coordinator stopped: {:?}", e.0);
        }
    }
}

/// Receiving halves drained by the coordinator
#[derive(Debug)]
pub struct EventQueues {
    pub central: mpsc::Receiver<CentralEvent>,
    pub peripheral: mpsc::Receiver<PeripheralEvent>,
}

/// Creates the two radio event queues.
pub fn event_queues(capacity: usize) -> (EventSinks, EventQueues) {
    let (central_tx, central_rx) = mpsc::channel(capacity);
    let (peripheral_tx, peripheral_rx) = mpsc::channel(capacity);
    (
        EventSinks {
            central: central_tx,
            peripheral: peripheral_tx,
        },
        EventQueues {
            central: central_rx,
            peripheral: peripheral_rx,
        },
    )
}
