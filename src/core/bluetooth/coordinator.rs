//! Session coordinator
//! Owns the registry, the central session and the advertiser, and is the only
//! consumer of radio events. Everything that mutates session state runs on its task.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::core::bluetooth::adapter::{AdapterStateMachine, AllowedActions};
use crate::core::bluetooth::advertiser::PeripheralAdvertiser;
use crate::core::bluetooth::connection::CentralSession;
use crate::core::bluetooth::constants::{LAST_CONNECTED_UUID_KEY, UNKNOWN_RSSI};
use crate::core::bluetooth::events::{CentralEvent, EventQueues, PeripheralEvent, SessionEvent};
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::{
    AdapterState, ConnectionSession, ConnectionState, PeripheralId, PeripheralRecord, RestoredPeripheral,
};
use crate::error::{SessionError, SessionResult};
use crate::settings::SettingsNavigator;
use crate::store::KeyValueStore;

/// Point-in-time view of the whole session core
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub devices: Vec<PeripheralRecord>,
    pub central_state: AdapterState,
    /// What the central adapter state currently permits
    pub central_actions: AllowedActions,
    pub peripheral_state: AdapterState,
    pub connection_state: ConnectionState,
    pub session: Option<ConnectionSession>,
    pub scanning: bool,
    pub advertising: bool,
    pub last_connected: Option<String>,
}

/// Where a command sends its result
pub type Reply<T> = oneshot::Sender<SessionResult<T>>;

/// Requests handled on the coordinator task
#[derive(Debug)]
pub enum Command {
    SelectPeripheral(usize, Reply<PeripheralId>),
    Disconnect(Reply<()>),
    Write(Uuid, Vec<u8>, Reply<()>),
    Read(Uuid, Reply<()>),
    ReadRssi(Reply<()>),
    StartScan(Reply<()>),
    StopScan(Reply<()>),
    Rescan(Reply<()>),
    StartAdvertising(Reply<()>),
    StopAdvertising(Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
}

pub struct SessionCoordinator {
    registry: DeviceRegistry,
    scanner: BluetoothScanner,
    session: CentralSession,
    advertiser: PeripheralAdvertiser,
    store: Arc<dyn KeyValueStore>,
    settings: Arc<dyn SettingsNavigator>,
    config: SessionConfig,
    central_state: AdapterState,
    notifier: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    /// Wires the components together. Fails if the configured local service is invalid.
    pub fn new(
        radio: Arc<dyn Radio>,
        store: Arc<dyn KeyValueStore>,
        settings: Arc<dyn SettingsNavigator>,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let scanner = BluetoothScanner::new(radio.clone(), config.central.scan_services.clone());
        let session = CentralSession::new(
            radio.clone(),
            config.central.selection_strategy(),
            config.central.step_timeouts(),
        );
        let mut advertiser = PeripheralAdvertiser::new(radio);
        advertiser.configure(
            config.advertising.service_id,
            config.advertising.characteristics.clone(),
        )?;
        let (notifier, _) = broadcast::channel(config.notification_capacity.max(1));

        Ok(Self {
            registry: DeviceRegistry::new(),
            scanner,
            session,
            advertiser,
            store,
            settings,
            config,
            central_state: AdapterState::Unknown,
            notifier,
        })
    }

    /// Observers get every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    fn emit(&self, event: SessionEvent) {
        if self.notifier.send(event).is_err() {
            debug!("No observers subscribed, event dropped");
        }
    }

    fn emit_registry(&self) {
        self.emit(SessionEvent::RegistryChanged {
            devices: self.registry.snapshot(),
        });
    }

    /// Publishes what the session and advertiser produced, persisting a newly ready peripheral.
    async fn flush(&mut self) {
        let mut events = self.session.take_events();
        events.extend(self.advertiser.take_events());
        for event in events {
            if let SessionEvent::ConnectionStateChanged {
                peripheral: Some(id),
                state: ConnectionState::Ready,
                ..
            } = &event
            {
                self.remember_last_connected(id).await;
            }
            self.emit(event);
        }
    }

    async fn remember_last_connected(&self, id: &PeripheralId) {
        match self.store.set(LAST_CONNECTED_UUID_KEY, id.as_str()).await {
            Ok(()) => info!("Saved {} as last connected peripheral", id),
            Err(e) => error!("Failed to save last connected peripheral: {:#}", e),
        }
    }

    fn central_ready(&self) -> SessionResult<()> {
        AdapterStateMachine::readiness(self.central_state).map_err(SessionError::AdapterNotReady)
    }

    pub async fn handle_central_event(&mut self, event: CentralEvent) {
        debug!("Central event: {:?}", event);
        match event {
            CentralEvent::PowerStateChanged(state) => self.on_central_power(state).await,
            CentralEvent::WillRestoreState { peripherals } => self.on_restore(peripherals),
            CentralEvent::Discovered {
                id,
                name,
                rssi,
                services,
            } => {
                let record = PeripheralRecord::new(id, name, rssi).with_services(services);
                self.registry.upsert(record);
                self.emit_registry();
            }
            CentralEvent::Connected { id, tag } => self.session.on_connected(&id, tag).await,
            CentralEvent::ConnectFailed { id, tag, error } => {
                self.session.on_connect_failed(&id, tag, error).await
            }
            CentralEvent::Disconnected { id, error } => self.session.on_link_lost(&id, error),
            CentralEvent::ServicesDiscovered { id, tag, result } => {
                self.session.on_services_discovered(&id, tag, result).await
            }
            CentralEvent::CharacteristicsDiscovered {
                id,
                service,
                tag,
                result,
            } => {
                self.session
                    .on_characteristics_discovered(&id, service, tag, result)
                    .await
            }
            CentralEvent::NotifyStateUpdated {
                id,
                characteristic,
                tag,
                result,
            } => {
                self.session
                    .on_notify_state(&id, characteristic, tag, result)
                    .await
            }
            CentralEvent::ValueUpdated {
                id,
                characteristic,
                tag,
                operation,
                value,
                error,
            } => self
                .session
                .on_value(&id, characteristic, tag, operation, value, error),
            CentralEvent::ValueWritten {
                id,
                characteristic,
                tag,
                value,
                error,
            } => self.session.on_written(&id, characteristic, tag, value, error),
            CentralEvent::RssiRead { id, tag, result } => {
                if let Some(rssi) = self.session.on_rssi(&id, tag, result) {
                    self.registry.update_rssi(&id, rssi);
                    self.emit(SessionEvent::RssiUpdated { peripheral: id, rssi });
                }
            }
            CentralEvent::NameUpdated { id, name } => {
                if self.registry.update_name(&id, name) {
                    self.emit_registry();
                }
            }
            CentralEvent::ServicesModified { id, invalidated } => {
                warn!("Peripheral {} invalidated {} service(s)", id, invalidated.len());
                self.emit(SessionEvent::ServicesInvalidated {
                    peripheral: id,
                    services: invalidated,
                });
            }
            CentralEvent::L2capChannelOpened { id, psm, error } => {
                self.emit(SessionEvent::L2capChannelOpened {
                    peripheral: id,
                    psm,
                    error,
                });
            }
        }
        self.flush().await;
    }

    async fn on_central_power(&mut self, state: AdapterState) {
        info!("Central adapter state: {}", state);
        self.central_state = state;
        self.emit(SessionEvent::AdapterStateChanged { state });

        match AdapterStateMachine::readiness(state) {
            Ok(()) => {
                if self.config.central.auto_scan {
                    if let Err(e) = self.scanner.start_scan().await {
                        error!("Failed to start scan: {:#}", e);
                    }
                }
            }
            Err(reason) => {
                self.scanner.reset();
                if let Some(id) = self.session.target().cloned() {
                    self.session.on_link_lost(&id, Some(reason.to_string()));
                }
                let prompt = AdapterStateMachine::prompt(reason);
                self.emit(SessionEvent::AdapterNotReady { reason, prompt });
                if state == AdapterState::PoweredOff && self.config.central.open_settings_on_power_off {
                    self.settings.open_system_bluetooth_settings();
                }
            }
        }
    }

    fn on_restore(&mut self, peripherals: Vec<RestoredPeripheral>) {
        info!("Restoring {} peripheral(s) kept by the system", peripherals.len());
        for peripheral in &peripherals {
            let record = PeripheralRecord::new(peripheral.id.clone(), peripheral.display_name.clone(), UNKNOWN_RSSI)
                .with_services(peripheral.service_id);
            self.registry.upsert(record);
        }
        if !peripherals.is_empty() {
            self.emit_registry();
        }
        for peripheral in &peripherals {
            if self.session.restore(peripheral) {
                break;
            }
        }
    }

    pub async fn handle_peripheral_event(&mut self, event: PeripheralEvent) {
        debug!("Peripheral event: {:?}", event);
        let powered_on = matches!(event, PeripheralEvent::PowerStateChanged(AdapterState::PoweredOn));
        self.advertiser.handle_event(event);
        if powered_on && self.config.advertising.auto_start {
            if let Err(e) = self.start_advertising().await {
                error!("Failed to start advertising: {}", e);
            }
        }
        self.flush().await;
    }

    /// Connects to the peripheral at `index` in the registry.
    pub async fn select_peripheral(&mut self, index: usize) -> SessionResult<PeripheralId> {
        self.central_ready()?;
        let record = self.registry.get(index)?;
        let id = record.id.clone();
        info!("Selected device {} ({})", index, record.label());
        let result = self.session.connect(id.clone(), &mut self.scanner).await;
        self.flush().await;
        result.map(|()| id)
    }

    pub async fn disconnect(&mut self) -> SessionResult<()> {
        self.session.disconnect().await;
        self.flush().await;
        Ok(())
    }

    pub async fn write(&mut self, characteristic: Uuid, value: Vec<u8>) -> SessionResult<()> {
        self.session.write(characteristic, value).await
    }

    pub async fn read(&mut self, characteristic: Uuid) -> SessionResult<()> {
        self.session.read(characteristic).await
    }

    pub async fn read_rssi(&mut self) -> SessionResult<()> {
        self.session.read_rssi().await
    }

    pub async fn start_scan(&mut self) -> SessionResult<()> {
        self.central_ready()?;
        self.scanner.start_scan().await.map_err(SessionError::radio)
    }

    pub async fn stop_scan(&mut self) -> SessionResult<()> {
        self.scanner.stop_scan().await.map_err(SessionError::radio)?;
        Ok(())
    }

    /// Forgets every discovered peripheral and scans again.
    pub async fn rescan(&mut self) -> SessionResult<()> {
        self.central_ready()?;
        self.scanner.stop_scan().await.map_err(SessionError::radio)?;
        self.registry.clear();
        self.emit_registry();
        self.scanner.start_scan().await.map_err(SessionError::radio)
    }

    pub async fn start_advertising(&mut self) -> SessionResult<()> {
        let local_name = self.config.advertising.local_name.clone();
        let result = self.advertiser.start_advertising(&local_name).await;
        self.flush().await;
        result
    }

    pub async fn stop_advertising(&mut self) -> SessionResult<()> {
        let result = self.advertiser.stop_advertising().await;
        self.flush().await;
        result
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let last_connected = match self.store.get(LAST_CONNECTED_UUID_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read last connected peripheral: {:#}", e);
                None
            }
        };
        SessionSnapshot {
            devices: self.registry.snapshot(),
            central_state: self.central_state,
            central_actions: AdapterStateMachine::allowed_actions(self.central_state),
            peripheral_state: self.advertiser.power_state(),
            connection_state: self.session.state(),
            session: self.session.session().cloned(),
            scanning: self.scanner.is_scanning(),
            advertising: self.advertiser.is_advertising(),
            last_connected,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        // A dropped reply receiver means the caller gave up waiting
        match command {
            Command::SelectPeripheral(index, reply) => {
                let _ = reply.send(self.select_peripheral(index).await);
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::Write(characteristic, value, reply) => {
                let _ = reply.send(self.write(characteristic, value).await);
            }
            Command::Read(characteristic, reply) => {
                let _ = reply.send(self.read(characteristic).await);
            }
            Command::ReadRssi(reply) => {
                let _ = reply.send(self.read_rssi().await);
            }
            Command::StartScan(reply) => {
                let _ = reply.send(self.start_scan().await);
            }
            Command::StopScan(reply) => {
                let _ = reply.send(self.stop_scan().await);
            }
            Command::Rescan(reply) => {
                let _ = reply.send(self.rescan().await);
            }
            Command::StartAdvertising(reply) => {
                let _ = reply.send(self.start_advertising().await);
            }
            Command::StopAdvertising(reply) => {
                let _ = reply.send(self.stop_advertising().await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot().await));
            }
        }
    }

    /// Processes events and commands until shutdown or until every handle is dropped.
    pub async fn run(
        mut self,
        mut queues: EventQueues,
        mut commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) {
        info!("Session coordinator started");
        loop {
            let deadline = self.session.deadline();
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session coordinator shutting down");
                    break;
                }
                Some(event) = queues.central.recv() => self.handle_central_event(event).await,
                Some(event) = queues.peripheral.recv() => self.handle_peripheral_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("All coordinator handles dropped");
                        break;
                    }
                },
                _ = step_deadline(deadline) => {
                    self.session.check_timeout(Instant::now()).await;
                    self.flush().await;
                }
            }
        }
        self.session.disconnect().await;
        self.flush().await;
    }

    /// Moves the coordinator onto its own task.
    pub fn spawn(self, queues: EventQueues) -> (CoordinatorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(self.config.command_queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let handle = CoordinatorHandle {
            commands: command_tx,
            notifier: self.notifier.clone(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(self.run(queues, command_rx, shutdown));
        (handle, task)
    }
}

async fn step_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front end to a spawned [`SessionCoordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    notifier: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl CoordinatorHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::CoordinatorClosed)?;
        response.await.map_err(|_| SessionError::CoordinatorClosed)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.notifier.subscribe()
    }

    pub async fn select_peripheral(&self, index: usize) -> SessionResult<PeripheralId> {
        self.request(|reply| Command::SelectPeripheral(index, reply)).await
    }

    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(Command::Disconnect).await
    }

    pub async fn write(&self, characteristic: Uuid, value: Vec<u8>) -> SessionResult<()> {
        self.request(|reply| Command::Write(characteristic, value, reply)).await
    }

    pub async fn read(&self, characteristic: Uuid) -> SessionResult<()> {
        self.request(|reply| Command::Read(characteristic, reply)).await
    }

    pub async fn read_rssi(&self) -> SessionResult<()> {
        self.request(Command::ReadRssi).await
    }

    pub async fn start_scan(&self) -> SessionResult<()> {
        self.request(Command::StartScan).await
    }

    pub async fn stop_scan(&self) -> SessionResult<()> {
        self.request(Command::StopScan).await
    }

    pub async fn rescan(&self) -> SessionResult<()> {
        self.request(Command::Rescan).await
    }

    pub async fn start_advertising(&self) -> SessionResult<()> {
        self.request(Command::StartAdvertising).await
    }

    pub async fn stop_advertising(&self) -> SessionResult<()> {
        self.request(Command::StopAdvertising).await
    }

    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Stops the coordinator; the live session is disconnected on the way out.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
