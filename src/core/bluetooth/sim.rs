//! In-process radio for tests, demos and headless runs
//!
//! `SimulatedRadio` records every request it receives. When peripherals are
//! attached it also answers the requests the way a cooperative device would,
//! pushing completions into the event queues.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use log::{debug, warn};
use uuid::Uuid;

use crate::core::bluetooth::events::{CentralEvent, EventSinks, PeripheralEvent};
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{
    AdapterState, AdvertisementPayload, GattOperation, LocalService, PeripheralId, RequestTag,
};

/// A request as seen by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Scan(Option<Vec<Uuid>>),
    StopScan,
    Connect(PeripheralId, RequestTag),
    DisconnectLink(PeripheralId),
    DiscoverServices(PeripheralId, RequestTag),
    DiscoverCharacteristics(PeripheralId, Uuid, RequestTag),
    SetNotify(PeripheralId, Uuid, bool, RequestTag),
    Read(PeripheralId, Uuid, RequestTag),
    Write(PeripheralId, Uuid, Vec<u8>, RequestTag),
    ReadRssi(PeripheralId, RequestTag),
    AddLocalService(Uuid),
    Advertise(AdvertisementPayload),
    StopAdvertising,
}

/// A device the simulated radio can find and talk to
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: i16,
    /// Services in discovery order, each with its characteristics in discovery order
    pub services: Vec<(Uuid, Vec<Uuid>)>,
    pub values: HashMap<Uuid, Vec<u8>>,
}

impl SimulatedPeripheral {
    pub fn new(id: impl Into<PeripheralId>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi,
            services: Vec::new(),
            values: HashMap::new(),
        }
    }

    pub fn with_service(mut self, service: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.services.push((service, characteristics));
        self
    }

    pub fn with_value(mut self, characteristic: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(characteristic, value.into());
        self
    }
}

pub struct SimulatedRadio {
    sinks: EventSinks,
    calls: Mutex<Vec<RadioCall>>,
    peripherals: Mutex<Vec<SimulatedPeripheral>>,
    respond: AtomicBool,
    reject: AtomicBool,
}

impl SimulatedRadio {
    /// A radio that only records requests
    pub fn new(sinks: EventSinks) -> Self {
        Self {
            sinks,
            calls: Mutex::new(Vec::new()),
            peripherals: Mutex::new(Vec::new()),
            respond: AtomicBool::new(false),
            reject: AtomicBool::new(false),
        }
    }

    /// A radio that answers requests on behalf of the given peripherals
    pub fn with_peripherals(sinks: EventSinks, peripherals: Vec<SimulatedPeripheral>) -> Self {
        let radio = Self::new(sinks);
        *radio.peripherals.lock().unwrap_or_else(|e| e.into_inner()) = peripherals;
        radio.respond.store(true, Ordering::SeqCst);
        radio
    }

    /// Requests recorded so far, oldest first
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Makes every following request fail synchronously
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Reports a power state on both roles
    pub fn set_power(&self, state: AdapterState) {
        self.push_central(CentralEvent::PowerStateChanged(state));
        self.push_peripheral(PeripheralEvent::PowerStateChanged(state));
    }

    /// Pushes a central event as if the platform had produced it
    pub fn push_central(&self, event: CentralEvent) {
        if let Err(e) = self.sinks.central.try_send(event) {
            warn!("Simulated radio could not queue central event: {}", e);
        }
    }

    pub fn push_peripheral(&self, event: PeripheralEvent) {
        if let Err(e) = self.sinks.peripheral.try_send(event) {
            warn!("Simulated radio could not queue peripheral event: {}", e);
        }
    }

    fn record(&self, call: RadioCall) -> Result<()> {
        debug!("Simulated radio request: {:?}", call);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
        if self.reject.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated radio rejected the request"));
        }
        Ok(())
    }

    fn responding(&self) -> bool {
        self.respond.load(Ordering::SeqCst)
    }

    fn peripheral(&self, id: &PeripheralId) -> Option<SimulatedPeripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| &p.id == id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl Radio for SimulatedRadio {
    async fn scan(&self, services: Option<Vec<Uuid>>) -> Result<()> {
        self.record(RadioCall::Scan(services.clone()))?;
        if self.responding() {
            let peripherals = self.peripherals.lock().unwrap_or_else(|e| e.into_inner()).clone();
            for p in peripherals {
                let advertised: Vec<Uuid> = p.services.iter().map(|(s, _)| *s).collect();
                if let Some(filter) = &services {
                    if !advertised.iter().any(|s| filter.contains(s)) {
                        continue;
                    }
                }
                self.push_central(CentralEvent::Discovered {
                    id: p.id,
                    name: p.name,
                    rssi: p.rssi,
                    services: advertised,
                });
            }
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(RadioCall::StopScan)
    }

    async fn connect(&self, id: &PeripheralId, tag: RequestTag) -> Result<()> {
        self.record(RadioCall::Connect(id.clone(), tag))?;
        if self.responding() {
            let event = match self.peripheral(id) {
                Some(_) => CentralEvent::Connected { id: id.clone(), tag },
                None => CentralEvent::ConnectFailed {
                    id: id.clone(),
                    tag,
                    error: "peripheral out of range".to_string(),
                },
            };
            self.push_central(event);
        }
        Ok(())
    }

    async fn disconnect_link(&self, id: &PeripheralId) -> Result<()> {
        self.record(RadioCall::DisconnectLink(id.clone()))?;
        if self.responding() {
            self.push_central(CentralEvent::Disconnected {
                id: id.clone(),
                error: None,
            });
        }
        Ok(())
    }

    async fn discover_services(
        &self,
        id: &PeripheralId,
        _filter: Option<Vec<Uuid>>,
        tag: RequestTag,
    ) -> Result<()> {
        self.record(RadioCall::DiscoverServices(id.clone(), tag))?;
        if let (true, Some(p)) = (self.responding(), self.peripheral(id)) {
            self.push_central(CentralEvent::ServicesDiscovered {
                id: id.clone(),
                tag,
                result: Ok(p.services.iter().map(|(s, _)| *s).collect()),
            });
        }
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: Uuid,
        _filter: Option<Vec<Uuid>>,
        tag: RequestTag,
    ) -> Result<()> {
        self.record(RadioCall::DiscoverCharacteristics(id.clone(), service, tag))?;
        if let (true, Some(p)) = (self.responding(), self.peripheral(id)) {
            let result = p
                .services
                .iter()
                .find(|(s, _)| *s == service)
                .map(|(_, chars)| chars.clone())
                .ok_or_else(|| format!("unknown service {}", service));
            self.push_central(CentralEvent::CharacteristicsDiscovered {
                id: id.clone(),
                service,
                tag,
                result,
            });
        }
        Ok(())
    }

    async fn set_notify(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        enabled: bool,
        tag: RequestTag,
    ) -> Result<()> {
        self.record(RadioCall::SetNotify(id.clone(), characteristic, enabled, tag))?;
        if self.responding() {
            self.push_central(CentralEvent::NotifyStateUpdated {
                id: id.clone(),
                characteristic,
                tag,
                result: Ok(enabled),
            });
        }
        Ok(())
    }

    async fn read_value(&self, id: &PeripheralId, characteristic: Uuid, tag: RequestTag) -> Result<()> {
        self.record(RadioCall::Read(id.clone(), characteristic, tag))?;
        if let (true, Some(p)) = (self.responding(), self.peripheral(id)) {
            let (value, error) = match p.values.get(&characteristic) {
                Some(v) => (v.clone(), None),
                None => (Vec::new(), Some("characteristic not readable".to_string())),
            };
            self.push_central(CentralEvent::ValueUpdated {
                id: id.clone(),
                characteristic,
                tag,
                operation: GattOperation::Read,
                value,
                error,
            });
        }
        Ok(())
    }

    async fn write_value(
        &self,
        id: &PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
        tag: RequestTag,
    ) -> Result<()> {
        self.record(RadioCall::Write(id.clone(), characteristic, value.clone(), tag))?;
        if self.responding() {
            if let Some(p) = self
                .peripherals
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter_mut()
                .find(|p| &p.id == id)
            {
                p.values.insert(characteristic, value.clone());
            }
            self.push_central(CentralEvent::ValueWritten {
                id: id.clone(),
                characteristic,
                tag,
                value,
                error: None,
            });
        }
        Ok(())
    }

    async fn read_rssi(&self, id: &PeripheralId, tag: RequestTag) -> Result<()> {
        self.record(RadioCall::ReadRssi(id.clone(), tag))?;
        if let (true, Some(p)) = (self.responding(), self.peripheral(id)) {
            self.push_central(CentralEvent::RssiRead {
                id: id.clone(),
                tag,
                result: Ok(p.rssi),
            });
        }
        Ok(())
    }

    async fn add_local_service(&self, service: &LocalService) -> Result<()> {
        self.record(RadioCall::AddLocalService(service.id))?;
        if self.responding() {
            self.push_peripheral(PeripheralEvent::ServiceAdded {
                service: service.id,
                error: None,
            });
        }
        Ok(())
    }

    async fn advertise(&self, payload: &AdvertisementPayload) -> Result<()> {
        self.record(RadioCall::Advertise(payload.clone()))?;
        if self.responding() {
            self.push_peripheral(PeripheralEvent::AdvertisingStarted { error: None });
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.record(RadioCall::StopAdvertising)
    }
}
