//! Error types for the BLE session core

use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::{AdapterState, ConnectionState};

/// Errors produced by the session core.
///
/// State-machine failures (`ConnectError`, `NoServices`, `NoCharacteristics`,
/// `SubscribeError`, `Timeout`) end the current session in `Failed`. The rest are
/// returned synchronously to the caller and leave the session untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionError {
    #[error("Bluetooth adapter not ready: {0}")]
    AdapterNotReady(AdapterNotReady),

    #[error("Connection already in progress")]
    AlreadyConnecting,

    #[error("Already connected to {id}")]
    AlreadyConnected { id: String },

    #[error("Failed to connect: {0}")]
    ConnectError(String),

    #[error("Peripheral exposes no services")]
    NoServices,

    #[error("Service exposes no characteristics")]
    NoCharacteristics,

    #[error("Failed to enable notifications: {0}")]
    SubscribeError(String),

    #[error("Link lost: {0}")]
    LinkLost(String),

    #[error("Timed out while {0}")]
    Timeout(ConnectionState),

    #[error("Session is not ready")]
    NotReady,

    #[error("Index {index} out of range (registry holds {len} devices)")]
    OutOfRange { index: usize, len: usize },

    #[error("Invalid characteristic configuration for {id}: {reason}")]
    InvalidCharacteristicConfig { id: String, reason: String },

    #[error("Payload is not valid UTF-8: {0}")]
    DecodeError(String),

    #[error("No local GATT service configured")]
    NotConfigured,

    #[error("Radio request failed: {0}")]
    Radio(String),

    #[error("Session coordinator has shut down")]
    CoordinatorClosed,
}

impl SessionError {
    /// Wraps a radio-layer failure.
    pub fn radio(err: anyhow::Error) -> Self {
        Self::Radio(format!("{:#}", err))
    }
}

/// Why the adapter cannot scan or advertise right now.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterNotReady {
    #[error("adapter state is unknown")]
    Unknown,
    #[error("adapter is resetting")]
    Resetting,
    #[error("Bluetooth LE is not supported on this device")]
    Unsupported,
    #[error("Bluetooth access is not authorized")]
    Unauthorized,
    #[error("Bluetooth is powered off")]
    PoweredOff,
}

impl AdapterNotReady {
    /// The state this reason was derived from.
    pub fn state(&self) -> AdapterState {
        match self {
            Self::Unknown => AdapterState::Unknown,
            Self::Resetting => AdapterState::Resetting,
            Self::Unsupported => AdapterState::Unsupported,
            Self::Unauthorized => AdapterState::Unauthorized,
            Self::PoweredOff => AdapterState::PoweredOff,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
