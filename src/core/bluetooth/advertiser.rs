//! Peripheral role: hosts one local GATT service and advertises it.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::adapter::AdapterStateMachine;
use crate::core::bluetooth::events::{PeripheralEvent, SessionEvent};
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{AdapterState, AdvertisementPayload, LocalCharacteristic, LocalService};
use crate::error::{SessionError, SessionResult};

/// Where the local service is in its registration with the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceRegistration {
    NotAdded,
    Requested,
    Added,
}

pub struct PeripheralAdvertiser {
    radio: Arc<dyn Radio>,
    power: AdapterState,
    service: Option<LocalService>,
    registration: ServiceRegistration,
    advertising: bool,
    outbox: Vec<SessionEvent>,
}

impl PeripheralAdvertiser {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self {
            radio,
            power: AdapterState::Unknown,
            service: None,
            registration: ServiceRegistration::NotAdded,
            advertising: false,
            outbox: Vec::new(),
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    pub fn power_state(&self) -> AdapterState {
        self.power
    }

    pub fn service(&self) -> Option<&LocalService> {
        self.service.as_ref()
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Validates and stores the local service definition.
    ///
    /// A characteristic with a non-empty fixed value has to be read-only.
    /// Replacing an already registered service requires re-adding it.
    pub fn configure(&mut self, service_id: Uuid, characteristics: Vec<LocalCharacteristic>) -> SessionResult<()> {
        let mut seen = HashSet::new();
        for characteristic in &characteristics {
            if !seen.insert(characteristic.id) {
                return Err(SessionError::InvalidCharacteristicConfig {
                    id: characteristic.id.to_string(),
                    reason: "duplicate characteristic id".into(),
                });
            }
            let has_value = characteristic.static_value.as_ref().is_some_and(|v| !v.is_empty());
            let props = characteristic.properties;
            if has_value && (!props.readable || props.writable) {
                return Err(SessionError::InvalidCharacteristicConfig {
                    id: characteristic.id.to_string(),
                    reason: "a fixed value requires a read-only characteristic".into(),
                });
            }
        }

        info!(
            "Local service {} configured with {} characteristic(s)",
            service_id,
            characteristics.len()
        );
        self.service = Some(LocalService {
            id: service_id,
            primary: true,
            characteristics,
        });
        self.registration = ServiceRegistration::NotAdded;
        Ok(())
    }

    /// Registers the local service if needed, then asks the radio to advertise it.
    pub async fn start_advertising(&mut self, local_name: &str) -> SessionResult<()> {
        AdapterStateMachine::readiness(self.power).map_err(SessionError::AdapterNotReady)?;
        let service = self.service.clone().ok_or(SessionError::NotConfigured)?;

        if self.registration == ServiceRegistration::NotAdded {
            self.radio
                .add_local_service(&service)
                .await
                .map_err(SessionError::radio)?;
            self.registration = ServiceRegistration::Requested;
        }

        let payload = AdvertisementPayload {
            local_name: local_name.to_string(),
            service_ids: vec![service.id],
        };
        info!("Requesting advertisement as '{}'", payload.local_name);
        self.radio.advertise(&payload).await.map_err(SessionError::radio)
    }

    pub async fn stop_advertising(&mut self) -> SessionResult<()> {
        if !self.advertising {
            debug!("Stop advertising requested while not advertising");
            return Ok(());
        }
        self.radio.stop_advertising().await.map_err(SessionError::radio)?;
        self.set_advertising(false, None);
        Ok(())
    }

    fn set_advertising(&mut self, advertising: bool, error: Option<String>) {
        self.advertising = advertising;
        self.outbox.push(SessionEvent::AdvertisingStateChanged { advertising, error });
    }

    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::PowerStateChanged(state) => {
                info!("Peripheral role adapter state: {}", state);
                self.power = state;
                if state != AdapterState::PoweredOn {
                    // The radio forgets registered services when it loses power
                    self.registration = ServiceRegistration::NotAdded;
                    if self.advertising {
                        self.set_advertising(false, None);
                    }
                }
                self.outbox.push(SessionEvent::PeripheralAdapterStateChanged { state });
            }
            PeripheralEvent::ServiceAdded { service, error: None } => {
                debug!("Local service {} added", service);
                if self.service.as_ref().is_some_and(|s| s.id == service) {
                    self.registration = ServiceRegistration::Added;
                }
            }
            PeripheralEvent::ServiceAdded { service, error: Some(e) } => {
                error!("Failed to add local service {}: {}", service, e);
                self.registration = ServiceRegistration::NotAdded;
            }
            PeripheralEvent::AdvertisingStarted { error: None } => {
                info!("Advertising started");
                self.set_advertising(true, None);
            }
            PeripheralEvent::AdvertisingStarted { error: Some(e) } => {
                warn!("Advertising failed to start: {}", e);
                self.set_advertising(false, Some(e));
            }
        }
    }
}
