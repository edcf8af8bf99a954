//! Sends the user to the system Bluetooth settings.

use log::{info, warn};

pub trait SettingsNavigator: Send + Sync {
    /// Fire-and-forget; failures are only logged
    fn open_system_bluetooth_settings(&self);
}

/// For hosts without a settings page to open: tells the user in the log instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSettingsNavigator;

impl SettingsNavigator for LogSettingsNavigator {
    fn open_system_bluetooth_settings(&self) {
        warn!("Bluetooth is powered off.");
        info!("Turn Bluetooth on in the system settings to continue.");
    }
}
