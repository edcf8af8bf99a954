//! Scan bookkeeping
//! Tracks whether a scan is running so that stop requests are issued exactly once.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use uuid::Uuid;

use crate::core::bluetooth::radio::Radio;

pub struct BluetoothScanner {
    radio: Arc<dyn Radio>,
    filter: Vec<Uuid>,
    active: bool,
}

impl BluetoothScanner {
    pub fn new(radio: Arc<dyn Radio>, filter: Vec<Uuid>) -> Self {
        Self {
            radio,
            filter,
            active: false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active
    }

    /// Starts a scan unless one is already running
    pub async fn start_scan(&mut self) -> Result<()> {
        if self.active {
            info!("Scan already running.");
            return Ok(());
        }
        let filter = if self.filter.is_empty() {
            None
        } else {
            Some(self.filter.clone())
        };
        self.radio.scan(filter).await?;
        self.active = true;
        info!("Device scan started.");
        Ok(())
    }

    /// Stops the running scan. Returns whether a stop request was actually issued.
    pub async fn stop_scan(&mut self) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        info!("Stopping Bluetooth scan.");
        self.active = false;
        self.radio.stop_scan().await?;
        Ok(true)
    }

    /// Forgets the scan without telling the radio, for when the radio dropped it itself.
    pub fn reset(&mut self) {
        if self.active {
            info!("Scan ended by the adapter.");
        }
        self.active = false;
    }
}
