//! The outbound connection state machine
//! connect → discover services → discover characteristics → subscribe → ready.
//!
//! Every request carries the session generation; completions from an older
//! generation (a cancelled or failed attempt) are dropped.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::bluetooth::events::SessionEvent;
use crate::core::bluetooth::notification::data_event;
use crate::core::bluetooth::radio::Radio;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::selection::SelectionStrategy;
use crate::core::bluetooth::types::{
    ConnectionSession, ConnectionState, GattOperation, PeripheralId, RequestTag,
    RestoredPeripheral,
};
use crate::error::{SessionError, SessionResult};

/// Upper bounds for the asynchronous setup steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeouts {
    pub connect: Duration,
    pub discovery: Duration,
    pub subscribe: Duration,
}

impl StepTimeouts {
    fn for_state(&self, state: ConnectionState) -> Option<Duration> {
        match state {
            ConnectionState::Connecting => Some(self.connect),
            ConnectionState::DiscoveringServices | ConnectionState::DiscoveringCharacteristics => {
                Some(self.discovery)
            }
            ConnectionState::Subscribing => Some(self.subscribe),
            _ => None,
        }
    }
}

/// Drives a single connection to completion
pub struct CentralSession {
    radio: Arc<dyn Radio>,
    strategy: Box<dyn SelectionStrategy>,
    timeouts: StepTimeouts,
    state: ConnectionState,
    session: Option<ConnectionSession>,
    /// Peripheral of the last session, kept for reporting after it is torn down
    last_target: Option<PeripheralId>,
    generation: u64,
    deadline: Option<Instant>,
    outbox: Vec<SessionEvent>,
}

impl CentralSession {
    pub fn new(radio: Arc<dyn Radio>, strategy: Box<dyn SelectionStrategy>, timeouts: StepTimeouts) -> Self {
        Self {
            radio,
            strategy,
            timeouts,
            state: ConnectionState::Idle,
            session: None,
            last_target: None,
            generation: 0,
            deadline: None,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn target(&self) -> Option<&PeripheralId> {
        self.session.as_ref().map(|s| &s.target)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the current step gives up, if a step is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Events produced since the last call, in order
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn tag(&self) -> RequestTag {
        RequestTag::new(self.generation)
    }

    /// True when a completion belongs to the live session for `id`
    fn is_current(&self, id: &PeripheralId, tag: RequestTag) -> bool {
        let current = tag.generation == self.generation
            && self.session.as_ref().is_some_and(|s| &s.target == id);
        if !current {
            debug!(
                "Ignoring stale completion for {} (generation {}, current {})",
                id, tag.generation, self.generation
            );
        }
        current
    }

    fn enter(&mut self, state: ConnectionState, reason: Option<SessionError>) {
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state;
        if let Some(session) = self.session.as_mut() {
            session.state = state;
        }
        self.deadline = self.timeouts.for_state(state).map(|d| Instant::now() + d);
        let peripheral = self.target().cloned().or_else(|| self.last_target.clone());
        self.outbox.push(SessionEvent::ConnectionStateChanged {
            peripheral,
            state,
            reason,
        });
    }

    /// Ends the session in a terminal state. The generation moves on so late completions are dropped.
    fn finish(&mut self, state: ConnectionState, reason: Option<SessionError>) {
        self.generation += 1;
        self.enter(state, reason);
        if let Some(session) = self.session.take() {
            self.last_target = Some(session.target);
        }
    }

    /// Fails the session. When a link may be up it is torn down as well.
    async fn fail(&mut self, reason: SessionError, release_link: bool) {
        error!("Connection failed while {}: {}", self.state, reason);
        let target = self.target().cloned();
        self.finish(ConnectionState::Failed, Some(reason));
        if let (true, Some(id)) = (release_link, target) {
            if let Err(e) = self.radio.disconnect_link(&id).await {
                warn!("Failed to release link to {}: {:#}", id, e);
            }
        }
    }

    /// Starts connecting to `target`. A running scan is stopped first.
    pub async fn connect(&mut self, target: PeripheralId, scanner: &mut BluetoothScanner) -> SessionResult<()> {
        if self.state.is_establishing() {
            warn!("Connect to {} refused, a connection is already in progress", target);
            return Err(SessionError::AlreadyConnecting);
        }
        if self.state == ConnectionState::Ready {
            let id = self.target().map(ToString::to_string).unwrap_or_default();
            return Err(SessionError::AlreadyConnected { id });
        }

        self.generation += 1;
        self.session = Some(ConnectionSession::new(target.clone(), self.generation));
        self.last_target = None;

        match scanner.stop_scan().await {
            Ok(true) => info!("Scan stopped for connection attempt"),
            Ok(false) => {}
            Err(e) => warn!("Failed to stop scan: {:#}", e),
        }

        info!("Initiating connection to {}...", target);
        self.enter(ConnectionState::Connecting, None);
        if let Err(e) = self.radio.connect(&target, self.tag()).await {
            let reason = SessionError::ConnectError(format!("{:#}", e));
            self.fail(reason.clone(), false).await;
            return Err(reason);
        }
        Ok(())
    }

    pub async fn on_connected(&mut self, id: &PeripheralId, tag: RequestTag) {
        if !self.is_current(id, tag) || self.state != ConnectionState::Connecting {
            return;
        }
        info!("Connection successful, discovering services...");
        self.enter(ConnectionState::DiscoveringServices, None);
        if let Err(e) = self.radio.discover_services(id, None, self.tag()).await {
            self.fail(SessionError::radio(e), true).await;
        }
    }

    pub async fn on_connect_failed(&mut self, id: &PeripheralId, tag: RequestTag, cause: String) {
        if !self.is_current(id, tag) || self.state != ConnectionState::Connecting {
            return;
        }
        self.fail(SessionError::ConnectError(cause), false).await;
    }

    pub async fn on_services_discovered(
        &mut self,
        id: &PeripheralId,
        tag: RequestTag,
        result: Result<Vec<Uuid>, String>,
    ) {
        if !self.is_current(id, tag) || self.state != ConnectionState::DiscoveringServices {
            return;
        }
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                warn!("Service discovery on {} reported an error: {}", id, e);
                Vec::new()
            }
        };
        for service in &services {
            debug!("Available service: {}", service);
        }
        let Some(service) = self.strategy.select_service(&services) else {
            self.fail(SessionError::NoServices, true).await;
            return;
        };
        info!("Selected service {}", service);
        if let Some(session) = self.session.as_mut() {
            session.discovered_service_id = Some(service);
        }
        self.enter(ConnectionState::DiscoveringCharacteristics, None);
        if let Err(e) = self.radio.discover_characteristics(id, service, None, self.tag()).await {
            self.fail(SessionError::radio(e), true).await;
        }
    }

    pub async fn on_characteristics_discovered(
        &mut self,
        id: &PeripheralId,
        service: Uuid,
        tag: RequestTag,
        result: Result<Vec<Uuid>, String>,
    ) {
        if !self.is_current(id, tag) || self.state != ConnectionState::DiscoveringCharacteristics {
            return;
        }
        if self.session.as_ref().and_then(|s| s.discovered_service_id) != Some(service) {
            debug!("Ignoring characteristics of unselected service {}", service);
            return;
        }
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                warn!("Characteristic discovery on {} reported an error: {}", service, e);
                Vec::new()
            }
        };
        let Some(characteristic) = self.strategy.select_characteristic(service, &characteristics) else {
            self.fail(SessionError::NoCharacteristics, true).await;
            return;
        };
        info!("Selected characteristic {} of service {}", characteristic, service);
        if let Some(session) = self.session.as_mut() {
            session.discovered_characteristic_id = Some(characteristic);
        }
        self.enter(ConnectionState::Subscribing, None);
        if let Err(e) = self.radio.set_notify(id, characteristic, true, self.tag()).await {
            self.fail(SessionError::SubscribeError(format!("{:#}", e)), true).await;
        }
    }

    pub async fn on_notify_state(
        &mut self,
        id: &PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        result: Result<bool, String>,
    ) {
        if !self.is_current(id, tag) || self.state != ConnectionState::Subscribing {
            return;
        }
        if self.session.as_ref().and_then(|s| s.discovered_characteristic_id) != Some(characteristic) {
            debug!("Ignoring notify state of unselected characteristic {}", characteristic);
            return;
        }
        match result {
            Ok(true) => {
                if let Some(session) = self.session.as_mut() {
                    session.notify_enabled = true;
                }
                info!("Notifications enabled on {}", characteristic);
                self.enter(ConnectionState::Ready, None);
            }
            Ok(false) => {
                let reason = SessionError::SubscribeError("peripheral left notifications disabled".into());
                self.fail(reason, true).await;
            }
            Err(e) => self.fail(SessionError::SubscribeError(e), true).await,
        }
    }

    /// The link went down without us asking
    pub fn on_link_lost(&mut self, id: &PeripheralId, cause: Option<String>) {
        if !self.state.is_active() || self.target() != Some(id) {
            debug!("Ignoring disconnect of {} in state {}", id, self.state);
            return;
        }
        info!("Link to {} lost while {}", id, self.state);
        match self.state {
            ConnectionState::Ready => self.finish(ConnectionState::Disconnected, cause.map(SessionError::LinkLost)),
            ConnectionState::Connecting => {
                let reason = SessionError::ConnectError(cause.unwrap_or_else(|| "link dropped".into()));
                error!("Connection failed while {}: {}", self.state, reason);
                self.finish(ConnectionState::Failed, Some(reason));
            }
            _ => {
                let reason = SessionError::LinkLost(cause.unwrap_or_else(|| "link dropped during setup".into()));
                error!("Connection failed while {}: {}", self.state, reason);
                self.finish(ConnectionState::Failed, Some(reason));
            }
        }
    }

    /// A read completed or a notification arrived
    pub fn on_value(
        &mut self,
        id: &PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        operation: GattOperation,
        value: Vec<u8>,
        error: Option<String>,
    ) {
        if !self.is_current(id, tag) || !self.state.is_active() {
            return;
        }
        let event = data_event(id.clone(), characteristic, operation, value, error);
        self.outbox.push(SessionEvent::DataReceived(event));
    }

    pub fn on_written(
        &mut self,
        id: &PeripheralId,
        characteristic: Uuid,
        tag: RequestTag,
        value: Vec<u8>,
        error: Option<String>,
    ) {
        self.on_value(id, characteristic, tag, GattOperation::Write, value, error);
    }

    /// Returns the RSSI when the reading belongs to the live session
    pub fn on_rssi(&mut self, id: &PeripheralId, tag: RequestTag, result: Result<i16, String>) -> Option<i16> {
        if !self.is_current(id, tag) {
            return None;
        }
        match result {
            Ok(rssi) => Some(rssi),
            Err(e) => {
                warn!("RSSI read on {} failed: {}", id, e);
                None
            }
        }
    }

    fn ready_target(&self) -> SessionResult<PeripheralId> {
        match (&self.session, self.state) {
            (Some(session), ConnectionState::Ready) => Ok(session.target.clone()),
            _ => Err(SessionError::NotReady),
        }
    }

    pub async fn read(&mut self, characteristic: Uuid) -> SessionResult<()> {
        let id = self.ready_target()?;
        self.radio
            .read_value(&id, characteristic, self.tag())
            .await
            .map_err(SessionError::radio)
    }

    pub async fn write(&mut self, characteristic: Uuid, value: Vec<u8>) -> SessionResult<()> {
        let id = self.ready_target()?;
        debug!("Writing {} bytes to {}", value.len(), characteristic);
        self.radio
            .write_value(&id, characteristic, value, self.tag())
            .await
            .map_err(SessionError::radio)
    }

    pub async fn read_rssi(&mut self) -> SessionResult<()> {
        let id = self.ready_target()?;
        self.radio.read_rssi(&id, self.tag()).await.map_err(SessionError::radio)
    }

    /// Tears the session down from any state. In-flight completions become stale.
    pub async fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Idle => debug!("Disconnect requested while idle"),
            ConnectionState::Disconnected => {
                self.generation += 1;
            }
            ConnectionState::Failed => {
                self.generation += 1;
                self.enter(ConnectionState::Disconnected, None);
            }
            _ => {
                let target = self.target().cloned();
                self.finish(ConnectionState::Disconnected, None);
                if let Some(id) = target {
                    info!("Disconnecting from device {}", id);
                    if let Err(e) = self.radio.disconnect_link(&id).await {
                        warn!("Failed to disconnect from {}: {:#}", id, e);
                    }
                }
            }
        }
    }

    /// Re-attaches to a peripheral the system kept connected across a relaunch.
    /// Returns true when the session went straight to `Ready`.
    pub fn restore(&mut self, peripheral: &RestoredPeripheral) -> bool {
        if self.state.is_active() {
            warn!("Ignoring restored peripheral {}, session already {}", peripheral.id, self.state);
            return false;
        }
        if !peripheral.connected {
            info!("Restored peripheral {} is not connected", peripheral.id);
            if self.state != ConnectionState::Idle {
                self.last_target = None;
                self.enter(ConnectionState::Idle, None);
            }
            return false;
        }
        self.generation += 1;
        let mut session = ConnectionSession::new(peripheral.id.clone(), self.generation);
        session.discovered_service_id = peripheral.service_id;
        session.discovered_characteristic_id = peripheral.characteristic_id;
        session.notify_enabled = peripheral.notifying;
        self.session = Some(session);
        self.last_target = None;
        info!("Restored live link to {}", peripheral.id);
        self.enter(ConnectionState::Ready, None);
        true
    }

    /// Fails the pending step if its deadline has passed
    pub async fn check_timeout(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if now >= deadline && self.state.is_establishing() => {
                let state = self.state;
                self.fail(SessionError::Timeout(state), true).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::events::event_queues;
    use crate::core::bluetooth::selection::FirstDiscovered;
    use crate::core::bluetooth::sim::{RadioCall, SimulatedRadio};

    const S1: Uuid = Uuid::from_u128(0x51);
    const S2: Uuid = Uuid::from_u128(0x52);
    const C1: Uuid = Uuid::from_u128(0xc1);

    fn timeouts() -> StepTimeouts {
        StepTimeouts {
            connect: Duration::from_secs(10),
            discovery: Duration::from_secs(10),
            subscribe: Duration::from_secs(10),
        }
    }

    fn setup() -> (Arc<SimulatedRadio>, CentralSession, BluetoothScanner) {
        let (sinks, _queues) = event_queues(64);
        let radio = Arc::new(SimulatedRadio::new(sinks));
        let session = CentralSession::new(radio.clone(), Box::new(FirstDiscovered), timeouts());
        let scanner = BluetoothScanner::new(radio.clone(), vec![]);
        (radio, session, scanner)
    }

    fn x() -> PeripheralId {
        PeripheralId::from("X")
    }

    fn states(events: &[SessionEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ConnectionStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    async fn drive_to_ready(session: &mut CentralSession, scanner: &mut BluetoothScanner) -> RequestTag {
        session.connect(x(), scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        session.on_services_discovered(&x(), tag, Ok(vec![S1, S2])).await;
        session.on_characteristics_discovered(&x(), S1, tag, Ok(vec![C1])).await;
        session.on_notify_state(&x(), C1, tag, Ok(true)).await;
        tag
    }

    #[tokio::test]
    async fn full_setup_selects_first_service_and_characteristic() {
        let (radio, mut session, mut scanner) = setup();
        let tag = drive_to_ready(&mut session, &mut scanner).await;

        assert_eq!(session.state(), ConnectionState::Ready);
        let s = session.session().unwrap();
        assert_eq!(s.discovered_service_id, Some(S1));
        assert_eq!(s.discovered_characteristic_id, Some(C1));
        assert!(s.notify_enabled);
        assert_eq!(
            states(&session.take_events()),
            vec![
                ConnectionState::Connecting,
                ConnectionState::DiscoveringServices,
                ConnectionState::DiscoveringCharacteristics,
                ConnectionState::Subscribing,
                ConnectionState::Ready,
            ]
        );
        assert_eq!(
            radio.calls(),
            vec![
                RadioCall::Connect(x(), tag),
                RadioCall::DiscoverServices(x(), tag),
                RadioCall::DiscoverCharacteristics(x(), S1, tag),
                RadioCall::SetNotify(x(), C1, true, tag),
            ]
        );
    }

    #[tokio::test]
    async fn connect_during_setup_is_refused_without_side_effects() {
        let (radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        let before = session.session().cloned();
        let calls_before = radio.calls().len();

        for _ in 0..3 {
            let err = session.connect(PeripheralId::from("Y"), &mut scanner).await.unwrap_err();
            assert_eq!(err, SessionError::AlreadyConnecting);
        }
        session.on_connected(&x(), tag).await;
        let err = session.connect(PeripheralId::from("Y"), &mut scanner).await.unwrap_err();
        assert_eq!(err, SessionError::AlreadyConnecting);

        assert_eq!(session.session().unwrap().target, before.unwrap().target);
        assert_eq!(session.generation(), tag.generation);
        assert_eq!(radio.calls().len(), calls_before + 1);
    }

    #[tokio::test]
    async fn connect_stops_running_scan_once() {
        let (radio, mut session, mut scanner) = setup();
        scanner.start_scan().await.unwrap();
        session.connect(x(), &mut scanner).await.unwrap();
        let _ = session.connect(x(), &mut scanner).await;
        let stops = radio.calls().iter().filter(|c| **c == RadioCall::StopScan).count();
        assert_eq!(stops, 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn read_and_write_outside_ready_fail() {
        let (_radio, mut session, mut scanner) = setup();
        for _ in 0..3 {
            assert_eq!(session.read(C1).await.unwrap_err(), SessionError::NotReady);
            assert_eq!(session.write(C1, vec![1]).await.unwrap_err(), SessionError::NotReady);
        }
        session.connect(x(), &mut scanner).await.unwrap();
        assert_eq!(session.read(C1).await.unwrap_err(), SessionError::NotReady);
        session.disconnect().await;
        assert_eq!(session.write(C1, vec![1]).await.unwrap_err(), SessionError::NotReady);
    }

    #[tokio::test]
    async fn read_and_write_in_ready_reach_the_radio() {
        let (radio, mut session, mut scanner) = setup();
        let tag = drive_to_ready(&mut session, &mut scanner).await;
        session.read(C1).await.unwrap();
        session.write(C1, b"hi".to_vec()).await.unwrap();
        let calls = radio.calls();
        assert!(calls.contains(&RadioCall::Read(x(), C1, tag)));
        assert!(calls.contains(&RadioCall::Write(x(), C1, b"hi".to_vec(), tag)));
    }

    #[tokio::test]
    async fn disconnect_makes_in_flight_subscribe_stale() {
        let (radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        session.on_services_discovered(&x(), tag, Ok(vec![S1])).await;
        session.on_characteristics_discovered(&x(), S1, tag, Ok(vec![C1])).await;
        assert_eq!(session.state(), ConnectionState::Subscribing);

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(radio.calls().contains(&RadioCall::DisconnectLink(x())));
        session.take_events();

        session.on_notify_state(&x(), C1, tag, Ok(true)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.take_events().is_empty());
    }

    #[tokio::test]
    async fn disconnect_from_ready_then_stale_events_are_ignored() {
        let (_radio, mut session, mut scanner) = setup();
        let tag = drive_to_ready(&mut session, &mut scanner).await;
        session.take_events();
        session.disconnect().await;
        assert_eq!(states(&session.take_events()), vec![ConnectionState::Disconnected]);

        session.on_value(&x(), C1, tag, GattOperation::Notify, b"late".to_vec(), None);
        session.on_link_lost(&x(), None);
        assert!(session.take_events().is_empty());
    }

    #[tokio::test]
    async fn disconnect_is_safe_everywhere() {
        let (_radio, mut session, mut scanner) = setup();
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.take_events().is_empty());

        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connect_failed(&x(), tag, "refused".into()).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn empty_discovery_results_fail_the_session() {
        let (radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        session.on_services_discovered(&x(), tag, Ok(vec![])).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        let events = session.take_events();
        assert!(matches!(
            events.last(),
            Some(SessionEvent::ConnectionStateChanged { reason: Some(SessionError::NoServices), .. })
        ));
        assert_eq!(radio.calls().last(), Some(&RadioCall::DisconnectLink(x())));

        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        session.on_services_discovered(&x(), tag, Ok(vec![S2])).await;
        session.on_characteristics_discovered(&x(), S2, tag, Err("gatt error".into())).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(matches!(
            session.take_events().last(),
            Some(SessionEvent::ConnectionStateChanged { reason: Some(SessionError::NoCharacteristics), .. })
        ));
    }

    #[tokio::test]
    async fn subscribe_error_fails_the_session() {
        let (_radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        session.on_services_discovered(&x(), tag, Ok(vec![S1])).await;
        session.on_characteristics_discovered(&x(), S1, tag, Ok(vec![C1])).await;
        session.on_notify_state(&x(), C1, tag, Err("not permitted".into())).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(matches!(
            session.take_events().last(),
            Some(SessionEvent::ConnectionStateChanged { reason: Some(SessionError::SubscribeError(_)), .. })
        ));
    }

    #[tokio::test]
    async fn failed_session_can_be_retried() {
        let (_radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let old = RequestTag::new(session.generation());
        session.on_connect_failed(&x(), old, "timeout".into()).await;
        assert_eq!(session.state(), ConnectionState::Failed);

        session.connect(x(), &mut scanner).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connecting);
        session.on_connected(&x(), old).await;
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn rejected_connect_request_fails_immediately() {
        let (radio, mut session, mut scanner) = setup();
        radio.set_reject(true);
        let err = session.connect(x(), &mut scanner).await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectError(_)));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn link_loss_in_ready_disconnects() {
        let (_radio, mut session, mut scanner) = setup();
        drive_to_ready(&mut session, &mut scanner).await;
        session.take_events();
        session.on_link_lost(&PeripheralId::from("other"), None);
        assert_eq!(session.state(), ConnectionState::Ready);
        session.on_link_lost(&x(), Some("supervision timeout".into()));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            session.take_events(),
            vec![SessionEvent::ConnectionStateChanged {
                peripheral: Some(x()),
                state: ConnectionState::Disconnected,
                reason: Some(SessionError::LinkLost("supervision timeout".into())),
            }]
        );
    }

    #[tokio::test]
    async fn link_loss_during_setup_fails_the_session() {
        let (_radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connected(&x(), tag).await;
        assert_eq!(session.state(), ConnectionState::DiscoveringServices);
        session.take_events();

        session.on_link_lost(&x(), None);
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(session.session().is_none());
        assert_eq!(
            session.take_events(),
            vec![SessionEvent::ConnectionStateChanged {
                peripheral: Some(x()),
                state: ConnectionState::Failed,
                reason: Some(SessionError::LinkLost("link dropped during setup".into())),
            }]
        );

        session.on_services_discovered(&x(), tag, Ok(vec![S1])).await;
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn link_loss_while_connecting_is_a_connect_error() {
        let (_radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        session.take_events();
        session.on_link_lost(&x(), Some("peer refused".into()));
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(
            session.take_events(),
            vec![SessionEvent::ConnectionStateChanged {
                peripheral: Some(x()),
                state: ConnectionState::Failed,
                reason: Some(SessionError::ConnectError("peer refused".into())),
            }]
        );
    }

    #[tokio::test]
    async fn connect_while_ready_is_refused() {
        let (_radio, mut session, mut scanner) = setup();
        drive_to_ready(&mut session, &mut scanner).await;
        let err = session.connect(PeripheralId::from("Y"), &mut scanner).await.unwrap_err();
        assert_eq!(err, SessionError::AlreadyConnected { id: "X".into() });
    }

    #[tokio::test]
    async fn values_are_decoded_into_data_events() {
        let (_radio, mut session, mut scanner) = setup();
        let tag = drive_to_ready(&mut session, &mut scanner).await;
        session.take_events();
        session.on_value(&x(), C1, tag, GattOperation::Notify, b"1111".to_vec(), None);
        session.on_value(&x(), C1, tag, GattOperation::Read, vec![0xc3, 0x28], None);
        let events = session.take_events();
        assert_eq!(events.len(), 2);
        match (&events[0], &events[1]) {
            (SessionEvent::DataReceived(text), SessionEvent::DataReceived(binary)) => {
                assert_eq!(text.text.as_deref(), Some("1111"));
                assert!(binary.decode_error.is_some());
                assert_eq!(binary.payload, vec![0xc3, 0x28]);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(session.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn restore_enters_ready_only_for_live_links() {
        let (_radio, mut session, _scanner) = setup();
        let mut restored = RestoredPeripheral {
            id: x(),
            display_name: None,
            connected: false,
            service_id: Some(S1),
            characteristic_id: Some(C1),
            notifying: true,
        };
        assert!(!session.restore(&restored));
        assert_eq!(session.state(), ConnectionState::Idle);

        restored.connected = true;
        assert!(session.restore(&restored));
        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(session.session().unwrap().discovered_characteristic_id, Some(C1));
        session.read(C1).await.unwrap();
    }

    #[tokio::test]
    async fn restore_of_dead_link_returns_terminal_session_to_idle() {
        let (_radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let tag = RequestTag::new(session.generation());
        session.on_connect_failed(&x(), tag, "unreachable".into()).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        session.take_events();

        let restored = RestoredPeripheral {
            id: x(),
            display_name: None,
            connected: false,
            service_id: None,
            characteristic_id: None,
            notifying: false,
        };
        assert!(!session.restore(&restored));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(states(&session.take_events()), vec![ConnectionState::Idle]);

        assert!(!session.restore(&restored));
        assert!(session.take_events().is_empty());
    }

    #[tokio::test]
    async fn pending_step_times_out() {
        let (radio, mut session, mut scanner) = setup();
        session.connect(x(), &mut scanner).await.unwrap();
        let deadline = session.deadline().unwrap();

        session.check_timeout(deadline - Duration::from_millis(1)).await;
        assert_eq!(session.state(), ConnectionState::Connecting);

        session.check_timeout(deadline).await;
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(session.deadline().is_none());
        assert!(matches!(
            session.take_events().last(),
            Some(SessionEvent::ConnectionStateChanged {
                reason: Some(SessionError::Timeout(ConnectionState::Connecting)),
                ..
            })
        ));
        assert_eq!(radio.calls().last(), Some(&RadioCall::DisconnectLink(x())));
    }
}
