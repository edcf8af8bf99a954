//! `Radio` over the bluest crate.
//!
//! bluest calls are awaited on spawned tasks and their results pushed into the
//! event queues, so a request returns as soon as it has been issued.
//! bluest only covers the central role; the peripheral role reports `Unsupported`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdapterEvent, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::UNKNOWN_RSSI;
use crate::core::bluetooth::events::{CentralEvent, EventSinks, PeripheralEvent};
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::types::{
    AdapterState, AdvertisementPayload, GattOperation, LocalService, PeripheralId, RequestTag,
};

type Shared<K, V> = Arc<Mutex<HashMap<K, V>>>;

pub struct BluestRadio {
    adapter: Adapter,
    sinks: EventSinks,
    devices: Shared<PeripheralId, Device>,
    services: Shared<(PeripheralId, Uuid), Service>,
    characteristics: Shared<(PeripheralId, Uuid), Characteristic>,
    /// One token per subscribed characteristic; cancelling it ends the notification task
    notifications: Shared<(PeripheralId, Uuid), CancellationToken>,
    scan_token: Mutex<Option<CancellationToken>>,
}

impl BluestRadio {
    /// Opens the default adapter and starts reporting its power state.
    pub async fn new(sinks: EventSinks) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        info!("Bluetooth adapter found.");

        let radio = Self {
            adapter,
            sinks,
            devices: Arc::new(Mutex::new(HashMap::new())),
            services: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            notifications: Arc::new(Mutex::new(HashMap::new())),
            scan_token: Mutex::new(None),
        };
        radio.spawn_power_monitor();
        radio
            .sinks
            .emit_peripheral(PeripheralEvent::PowerStateChanged(AdapterState::Unsupported))
            .await;
        Ok(radio)
    }

    fn spawn_power_monitor(&self) {
        let adapter = self.adapter.clone();
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            let initial = match adapter.is_available().await {
                Ok(true) => AdapterState::PoweredOn,
                Ok(false) => AdapterState::PoweredOff,
                Err(e) => {
                    warn!("Could not query adapter availability: {}", e);
                    AdapterState::Unknown
                }
            };
            sinks.emit_central(CentralEvent::PowerStateChanged(initial)).await;

            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to subscribe to adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::PoweredOn,
                    Ok(AdapterEvent::Unavailable) => AdapterState::PoweredOff,
                    Err(e) => {
                        warn!("Adapter event error: {}", e);
                        continue;
                    }
                };
                sinks.emit_central(CentralEvent::PowerStateChanged(state)).await;
            }
            info!("Adapter event stream has ended.");
        });
    }

    async fn device(&self, id: &PeripheralId) -> Result<Device> {
        self.devices
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", id))
    }

    async fn characteristic(&self, id: &PeripheralId, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .lock()
            .await
            .get(&(id.clone(), uuid))
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic {} not discovered on {}", uuid, id))
    }

    async fn stop_notifications(&self, id: &PeripheralId) {
        let mut notifications = self.notifications.lock().await;
        notifications.retain(|(peripheral, _), token| {
            if peripheral == id {
                token.cancel();
                false
            } else {
                true
            }
        });
    }

    async fn notification_task(
        id: PeripheralId,
        device: Device,
        characteristic: Characteristic,
        tag: RequestTag,
        token: CancellationToken,
        sinks: EventSinks,
    ) {
        let uuid = characteristic.uuid();
        let mut stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                let result = Err(e.to_string());
                sinks
                    .emit_central(CentralEvent::NotifyStateUpdated { id, characteristic: uuid, tag, result })
                    .await;
                return;
            }
        };
        sinks
            .emit_central(CentralEvent::NotifyStateUpdated {
                id: id.clone(),
                characteristic: uuid,
                tag,
                result: Ok(true),
            })
            .await;

        info!("Listening for notifications on {}...", uuid);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Notifications on {} cancelled", uuid);
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(value)) => {
                        sinks
                            .emit_central(CentralEvent::ValueUpdated {
                                id: id.clone(),
                                characteristic: uuid,
                                tag,
                                operation: GattOperation::Notify,
                                value,
                                error: None,
                            })
                            .await;
                    }
                    Some(Err(e)) => {
                        warn!("Notification error on {}: {}", uuid, e);
                    }
                    None => break,
                },
            }
        }

        info!("Notification stream on {} has ended.", uuid);
        if !device.is_connected().await {
            sinks
                .emit_central(CentralEvent::Disconnected {
                    id,
                    error: Some("notification stream ended with the link".into()),
                })
                .await;
        }
    }
}

#[async_trait::async_trait]
impl Radio for BluestRadio {
    async fn scan(&self, services: Option<Vec<Uuid>>) -> Result<()> {
        let token = CancellationToken::new();
        if let Some(previous) = self.scan_token.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let sinks = self.sinks.clone();
        let filter = services.unwrap_or_default();
        tokio::spawn(async move {
            info!("Starting bluetooth scan");
            let mut scan_stream = match adapter.scan(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start scan: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = scan_stream.next() => match result {
                        Some(discovered) => {
                            let device = discovered.device;
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device, discovered.rssi);
                            let id = PeripheralId::new(device.id().to_string());
                            let name = discovered.adv_data.local_name.or_else(|| device.name().ok());
                            devices.lock().await.insert(id.clone(), device);
                            sinks
                                .emit_central(CentralEvent::Discovered {
                                    id,
                                    name,
                                    rssi: discovered.rssi.unwrap_or(UNKNOWN_RSSI),
                                    services: discovered.adv_data.services,
                                })
                                .await;
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    },
                }
            }
        });
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(token) = self.scan_token.lock().await.take() {
            token.cancel();
        }
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId, tag: RequestTag) -> Result<()> {
        let device = self.device(id).await?;
        let adapter = self.adapter.clone();
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let event = if device.is_connected().await {
                info!("Device already connected.");
                CentralEvent::Connected { id, tag }
            } else {
                info!("Initiating connection to {}...", id);
                match adapter.connect_device(&device).await {
                    Ok(()) => CentralEvent::Connected { id, tag },
                    Err(e) => CentralEvent::ConnectFailed {
                        id,
                        tag,
                        error: e.to_string(),
                    },
                }
            };
            sinks.emit_central(event).await;
        });
        Ok(())
    }

    async fn disconnect_link(&self, id: &PeripheralId) -> Result<()> {
        self.stop_notifications(id).await;
        let device = self.device(id).await?;
        let adapter = self.adapter.clone();
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let error = if device.is_connected().await {
                info!("Disconnecting from device {}", id);
                adapter.disconnect_device(&device).await.err().map(|e| e.to_string())
            } else {
                info!("Device {} not connected", id);
                None
            };
            sinks.emit_central(CentralEvent::Disconnected { id, error }).await;
        });
        Ok(())
    }

    async fn discover_services(&self, id: &PeripheralId, filter: Option<Vec<Uuid>>, tag: RequestTag) -> Result<()> {
        let device = self.device(id).await?;
        let cache = self.services.clone();
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = match device.discover_services().await {
                Ok(services) => {
                    let mut cache = cache.lock().await;
                    let mut found = Vec::new();
                    for service in services {
                        let uuid = service.uuid();
                        if filter.as_ref().is_some_and(|f| !f.contains(&uuid)) {
                            continue;
                        }
                        cache.insert((id.clone(), uuid), service);
                        found.push(uuid);
                    }
                    Ok(found)
                }
                Err(e) => Err(e.to_string()),
            };
            sinks
                .emit_central(CentralEvent::ServicesDiscovered { id, tag, result })
                .await;
        });
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        id: &PeripheralId,
        service: Uuid,
        filter: Option<Vec<Uuid>>,
        tag: RequestTag,
    ) -> Result<()> {
        let handle = self
            .services
            .lock()
            .await
            .get(&(id.clone(), service))
            .cloned()
            .ok_or_else(|| anyhow!("Service {} not discovered on {}", service, id))?;
        let cache = self.characteristics.clone();
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = match handle.discover_characteristics().await {
                Ok(characteristics) => {
                    let mut cache = cache.lock().await;
                    let mut found = Vec::new();
                    for characteristic in characteristics {
                        let uuid = characteristic.uuid();
                        if filter.as_ref().is_some_and(|f| !f.contains(&uuid)) {
                            continue;
                        }
                        cache.insert((id.clone(), uuid), characteristic);
                        found.push(uuid);
                    }
                    Ok(found)
                }
                Err(e) => Err(e.to_string()),
            };
            sinks
                .emit_central(CentralEvent::CharacteristicsDiscovered {
                    id,
                    service,
                    tag,
                    result,
                })
                .await;
        });
        Ok(())
    }

    async fn set_notify(&self, id: &PeripheralId, characteristic: Uuid, enabled: bool, tag: RequestTag) -> Result<()> {
        let key = (id.clone(), characteristic);
        if let Some(token) = self.notifications.lock().await.remove(&key) {
            token.cancel();
        }
        if !enabled {
            self.sinks
                .emit_central(CentralEvent::NotifyStateUpdated {
                    id: id.clone(),
                    characteristic,
                    tag,
                    result: Ok(false),
                })
                .await;
            return Ok(());
        }

        let device = self.device(id).await?;
        let handle = self.characteristic(id, characteristic).await?;
        let token = CancellationToken::new();
        self.notifications.lock().await.insert(key, token.clone());
        tokio::spawn(Self::notification_task(
            id.clone(),
            device,
            handle,
            tag,
            token,
            self.sinks.clone(),
        ));
        Ok(())
    }

    async fn read_value(&self, id: &PeripheralId, characteristic: Uuid, tag: RequestTag) -> Result<()> {
        let handle = self.characteristic(id, characteristic).await?;
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let (value, error) = match handle.read().await {
                Ok(value) => (value, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };
            sinks
                .emit_central(CentralEvent::ValueUpdated {
                    id,
                    characteristic,
                    tag,
                    operation: GattOperation::Read,
                    value,
                    error,
                })
                .await;
        });
        Ok(())
    }

    async fn write_value(&self, id: &PeripheralId, characteristic: Uuid, value: Vec<u8>, tag: RequestTag) -> Result<()> {
        let handle = self.characteristic(id, characteristic).await?;
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let error = handle.write(&value).await.err().map(|e| e.to_string());
            sinks
                .emit_central(CentralEvent::ValueWritten {
                    id,
                    characteristic,
                    tag,
                    value,
                    error,
                })
                .await;
        });
        Ok(())
    }

    async fn read_rssi(&self, id: &PeripheralId, tag: RequestTag) -> Result<()> {
        let device = self.device(id).await?;
        let sinks = self.sinks.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = device.rssi().await.map_err(|e| e.to_string());
            sinks.emit_central(CentralEvent::RssiRead { id, tag, result }).await;
        });
        Ok(())
    }

    async fn add_local_service(&self, service: &LocalService) -> Result<()> {
        Err(anyhow!(
            "Cannot host service {}: peripheral role is not supported by this backend",
            service.id
        ))
    }

    async fn advertise(&self, payload: &AdvertisementPayload) -> Result<()> {
        Err(anyhow!(
            "Cannot advertise '{}': peripheral role is not supported by this backend",
            payload.local_name
        ))
    }

    async fn stop_advertising(&self) -> Result<()> {
        Ok(())
    }
}
