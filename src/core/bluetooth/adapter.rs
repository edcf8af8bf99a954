//! Classifies the radio power state into what the session may do.

use serde::Serialize;

use crate::core::bluetooth::types::AdapterState;
use crate::error::AdapterNotReady;

/// Actions permitted in a given adapter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedActions {
    pub can_scan: bool,
    pub can_advertise: bool,
}

/// What the user should be asked to do about a not-ready adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UserPrompt {
    /// Bluetooth is off; the system settings page is where to turn it on
    OpenBluetoothSettings,
    /// Access has to be granted to the application
    GrantPermission,
    /// Nothing the user can do, just report it
    Inform,
    /// Transient state, wait for the next update
    Wait,
}

pub struct AdapterStateMachine;

impl AdapterStateMachine {
    pub fn allowed_actions(state: AdapterState) -> AllowedActions {
        let on = state == AdapterState::PoweredOn;
        AllowedActions {
            can_scan: on,
            can_advertise: on,
        }
    }

    /// `Ok` only when powered on; otherwise the reason to surface.
    pub fn readiness(state: AdapterState) -> Result<(), AdapterNotReady> {
        match state {
            AdapterState::PoweredOn => Ok(()),
            AdapterState::Unknown => Err(AdapterNotReady::Unknown),
            AdapterState::Resetting => Err(AdapterNotReady::Resetting),
            AdapterState::Unsupported => Err(AdapterNotReady::Unsupported),
            AdapterState::Unauthorized => Err(AdapterNotReady::Unauthorized),
            AdapterState::PoweredOff => Err(AdapterNotReady::PoweredOff),
        }
    }

    pub fn prompt(reason: AdapterNotReady) -> UserPrompt {
        match reason {
            AdapterNotReady::PoweredOff => UserPrompt::OpenBluetoothSettings,
            AdapterNotReady::Unauthorized => UserPrompt::GrantPermission,
            AdapterNotReady::Unsupported => UserPrompt::Inform,
            AdapterNotReady::Unknown | AdapterNotReady::Resetting => UserPrompt::Wait,
        }
    }
}
