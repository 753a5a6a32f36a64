use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::hw::RadioTransport;
use crate::model::{
    Advertisement, LinkEvent, LinkSnapshot, PeripheralIdentity, RecordedSample, Sample,
    SampleBatch, SessionId, StateChange,
};
use crate::record::{RecordBook, SessionRecord, SessionRecordStore};
use crate::registry::{DeviceRegistry, DiscoveryFilter, ScanEvent};
use crate::session::{CloseReason, ConnectionSession, SessionEvent, SessionReport};
use crate::state::{ConnectionState, LinkInput, transition};

/// A subscriber stream. Events missed by a slow subscriber are logged and skipped.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Independent sample and state streams for one subscriber.
pub struct Subscription {
    pub samples: EventStream<SampleBatch>,
    pub states: EventStream<StateChange>,
}

#[derive(Debug)]
enum Command {
    Connect(PeripheralIdentity),
    Disconnect,
    StartScanning(DiscoveryFilter),
    StopScanning,
    AutoReconnect,
    StartupReconnect,
    SetStopped(bool),
    SessionSamples(oneshot::Sender<Vec<RecordedSample>>),
    Record(oneshot::Sender<SessionRecord>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end of a running [`SensorLink`].
///
/// Control operations are fire-and-forget; their effect is observed on the
/// state stream. They only fail once the supervisor has stopped.
#[derive(Debug, Clone)]
pub struct SensorLinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<LinkEvent>,
    states: broadcast::Sender<StateChange>,
    samples: broadcast::Sender<SampleBatch>,
    snapshot: watch::Receiver<LinkSnapshot>,
    discovered: watch::Receiver<Vec<Advertisement>>,
}

impl SensorLinkHandle {
    /// Connects to a peripheral, tearing down any active session first.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn connect(&self, identity: PeripheralIdentity) -> Result<(), LinkError> {
        self.send(Command::Connect(identity))
    }

    /// Disconnects the active session or stops the running scan.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        self.send(Command::Disconnect)
    }

    /// Starts a scan window. Ignored while a link is active.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn start_scanning(&self, filter: DiscoveryFilter) -> Result<(), LinkError> {
        self.send(Command::StartScanning(filter))
    }

    /// Stops the running scan, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn stop_scanning(&self) -> Result<(), LinkError> {
        self.send(Command::StopScanning)
    }

    /// Connects to the saved peripheral unless already streaming.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn auto_reconnect(&self) -> Result<(), LinkError> {
        self.send(Command::AutoReconnect)
    }

    /// Runs [`Self::auto_reconnect`] unless this is the first launch, then records the launch.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn startup_reconnect(&self) -> Result<(), LinkError> {
        self.send(Command::StartupReconnect)
    }

    /// Sets whether decoded batches are discarded instead of published.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub fn set_stopped(&self, stopped: bool) -> Result<(), LinkError> {
        self.send(Command::SetStopped(stopped))
    }

    /// Subscribes to both samples and state changes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            samples: self.subscribe_samples(),
            states: self.subscribe_state(),
        }
    }

    #[must_use]
    pub fn subscribe_samples(&self) -> EventStream<SampleBatch> {
        lossy_stream(self.samples.subscribe(), "samples")
    }

    #[must_use]
    pub fn subscribe_state(&self) -> EventStream<StateChange> {
        lossy_stream(self.states.subscribe(), "states")
    }

    /// Subscribes to every typed link event, including discovery updates.
    #[must_use]
    pub fn events(&self) -> EventStream<LinkEvent> {
        lossy_stream(self.events.subscribe(), "events")
    }

    /// Returns the latest-wins link snapshot.
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot.clone()
    }

    /// Returns the discovered list of the current scan window.
    #[must_use]
    pub fn discovered(&self) -> watch::Receiver<Vec<Advertisement>> {
        self.discovered.clone()
    }

    /// Returns every accepted sample of the current or last session.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub async fn session_samples(&self) -> Result<Vec<RecordedSample>, LinkError> {
        self.request(Command::SessionSamples).await
    }

    /// Returns the persisted session record as currently cached.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor is no longer running.
    pub async fn saved_record(&self) -> Result<SessionRecord, LinkError> {
        self.request(Command::Record).await
    }

    /// Tears down the active session, writes the session record and stops the supervisor.
    ///
    /// # Errors
    ///
    /// Returns an error when the supervisor already stopped.
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.request(Command::Shutdown).await
    }

    fn send(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .map_err(|_closed| LinkError::SupervisorStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx))?;
        reply_rx
            .await
            .map_err(|_dropped| LinkError::SupervisorStopped)
    }
}

fn lossy_stream<T>(receiver: broadcast::Receiver<T>, channel: &'static str) -> EventStream<T>
where
    T: Clone + Send + 'static,
{
    Box::pin(
        BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(item) => Some(item),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(channel, missed, "subscriber fell behind; oldest events were dropped");
                None
            }
        }),
    )
}

#[derive(Debug)]
struct SessionLog {
    capacity: usize,
    samples: VecDeque<RecordedSample>,
}

impl SessionLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::new(),
        }
    }

    fn push(&mut self, sample: RecordedSample) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    fn to_vec(&self) -> Vec<RecordedSample> {
        self.samples.iter().copied().collect()
    }
}

/// Long-lived supervisor owning the registry and at most one session.
#[derive(Debug)]
pub struct SensorLink {
    config: LinkConfig,
    transport: Arc<dyn RadioTransport>,
    registry: DeviceRegistry,
    state: ConnectionState,
    session: Option<ConnectionSession>,
    next_session: SessionId,
    live_value: u16,
    session_log: SessionLog,
    scan_deadline: Option<Instant>,
    events: broadcast::Sender<LinkEvent>,
    states: broadcast::Sender<StateChange>,
    samples: broadcast::Sender<SampleBatch>,
    snapshot: watch::Sender<LinkSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    reports_tx: mpsc::UnboundedSender<SessionReport>,
    reports: mpsc::UnboundedReceiver<SessionReport>,
    scans: mpsc::UnboundedReceiver<ScanEvent>,
}

impl SensorLink {
    /// Starts the supervisor task and returns its handle.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        config: LinkConfig,
        transport: Arc<dyn RadioTransport>,
        store: Box<dyn SessionRecordStore>,
    ) -> SensorLinkHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let (scan_tx, scans) = mpsc::unbounded_channel();
        let capacity = config.event_capacity();
        let (events, _) = broadcast::channel(capacity);
        let (states, _) = broadcast::channel(capacity);
        let (samples, _) = broadcast::channel(capacity);

        let records = RecordBook::open(store);
        let registry = DeviceRegistry::new(Arc::clone(&transport), records, scan_tx);
        let (snapshot, snapshot_rx) = watch::channel(LinkSnapshot::default());

        let handle = SensorLinkHandle {
            commands: commands_tx,
            events: events.clone(),
            states: states.clone(),
            samples: samples.clone(),
            snapshot: snapshot_rx,
            discovered: registry.watch_discovered(),
        };

        let link = Self {
            session_log: SessionLog::new(config.session_log_capacity()),
            config,
            transport,
            registry,
            state: ConnectionState::Disconnected,
            session: None,
            next_session: SessionId::FIRST,
            live_value: 0,
            scan_deadline: None,
            events,
            states,
            samples,
            snapshot,
            commands,
            reports_tx,
            reports,
            scans,
        };
        tokio::spawn(link.run().instrument(info_span!("sensor_link")));

        handle
    }

    async fn run(mut self) {
        let reply = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all handles dropped");
                        break None;
                    };
                    if let ControlFlow::Break(reply) = self.handle_command(command).await {
                        break Some(reply);
                    }
                }
                Some(report) = self.reports.recv() => self.handle_report(report).await,
                Some(event) = self.scans.recv() => self.handle_scan_event(event),
                () = wait_for_deadline(self.scan_deadline) => {
                    debug!("scan window elapsed");
                    self.stop_scanning().await;
                }
            }
        };

        self.shutdown().await;
        self.registry.into_records().close().await;
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
        debug!("sensor link stopped");
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        trace!(?command, "handling command");
        match command {
            Command::Connect(identity) => self.connect(identity).await,
            Command::Disconnect => self.disconnect().await,
            Command::StartScanning(filter) => self.start_scanning(filter).await,
            Command::StopScanning => self.stop_scanning().await,
            Command::AutoReconnect => self.auto_reconnect().await,
            Command::StartupReconnect => {
                if self.registry.records_mut().mark_launched() {
                    self.auto_reconnect().await;
                } else {
                    info!("first launch; skipping auto-reconnect");
                }
            }
            Command::SetStopped(stopped) => self.registry.records_mut().set_stopped(stopped),
            Command::SessionSamples(reply) => {
                let _ = reply.send(self.session_log.to_vec());
            }
            Command::Record(reply) => {
                let _ = reply.send(self.registry.records().record().clone());
            }
            Command::Shutdown(reply) => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    #[instrument(skip(self), level = "debug", fields(address = identity.address()))]
    async fn connect(&mut self, identity: PeripheralIdentity) {
        if self.registry.is_scanning() {
            self.scan_deadline = None;
            self.registry.stop_scan().await;
        }
        self.teardown_session().await;

        let id = self.next_session;
        self.next_session = id.next();
        self.session = Some(ConnectionSession::spawn(
            id,
            identity,
            Arc::clone(&self.transport),
            &self.config,
            self.reports_tx.clone(),
        ));
        self.apply(LinkInput::ConnectRequested);
    }

    async fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Disconnected => trace!("already disconnected"),
            ConnectionState::Scanning => {
                self.apply(LinkInput::DisconnectRequested);
                self.scan_deadline = None;
                self.registry.stop_scan().await;
                self.apply(LinkInput::TeardownComplete);
            }
            _ => self.teardown_session().await,
        }
    }

    async fn teardown_session(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.apply(LinkInput::DisconnectRequested);
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
        self.apply(LinkInput::TeardownComplete);
    }

    async fn start_scanning(&mut self, filter: DiscoveryFilter) {
        if self.state.holds_link() {
            debug!(state = %self.state, "ignoring scan request while a link is active");
            return;
        }

        if let Err(error) = self.registry.start_scan(filter).await {
            warn!(%error, "failed to start scan");
            self.scan_deadline = None;
            if self.state == ConnectionState::Scanning {
                self.apply(LinkInput::ScanStopped);
            }
            return;
        }
        let _ = self.events.send(LinkEvent::Discovered(Vec::new()));
        self.scan_deadline = Some(Instant::now() + self.config.scan_window());
        self.apply(LinkInput::ScanStarted);
    }

    async fn stop_scanning(&mut self) {
        self.scan_deadline = None;
        self.registry.stop_scan().await;
        if self.state == ConnectionState::Scanning {
            self.apply(LinkInput::ScanStopped);
        }
    }

    async fn auto_reconnect(&mut self) {
        if self.state == ConnectionState::Streaming {
            debug!("already streaming; skipping auto-reconnect");
            return;
        }
        let Some(identity) = self.registry.saved_identity() else {
            debug!("no saved peripheral; skipping auto-reconnect");
            return;
        };
        info!(address = identity.address(), "reconnecting to saved peripheral");
        self.connect(identity).await;
    }

    async fn shutdown(&mut self) {
        self.scan_deadline = None;
        self.registry.stop_scan().await;
        if self.state == ConnectionState::Scanning {
            self.apply(LinkInput::ScanStopped);
        }
        self.teardown_session().await;
    }

    async fn handle_report(&mut self, report: SessionReport) {
        let is_active = self
            .session
            .as_ref()
            .is_some_and(|session| session.id() == report.id);
        if !is_active {
            trace!(session_id = %report.id, "dropping report from a retired session");
            return;
        }

        match report.event {
            SessionEvent::LinkEstablished => {
                self.apply(LinkInput::LinkEstablished);
            }
            SessionEvent::Streaming => {
                if self.apply(LinkInput::NotificationsEnabled) {
                    self.session_log.clear();
                    if let Some(session) = &self.session {
                        let identity = session.identity().clone();
                        self.registry.records_mut().remember_identity(&identity);
                    }
                }
            }
            SessionEvent::Samples(samples) => self.accept_samples(report.id, samples),
            SessionEvent::Closed(reason) => self.session_closed(reason).await,
        }
    }

    async fn session_closed(&mut self, reason: CloseReason) {
        match &reason {
            CloseReason::ConnectFailed(error) | CloseReason::SetupFailed(error) => {
                warn!(%error, state = %self.state, "session failed");
            }
            CloseReason::LinkLost => warn!("link lost"),
            CloseReason::Cancelled => debug!("session cancelled"),
        }

        let input = match self.state {
            ConnectionState::Connecting => LinkInput::LinkFailed,
            ConnectionState::ServiceDiscovery => LinkInput::SetupFailed,
            ConnectionState::Streaming => LinkInput::LinkLost,
            state => {
                debug!(%state, "session closed outside a link state");
                return;
            }
        };
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
        self.apply(input);
    }

    fn accept_samples(&mut self, id: SessionId, samples: Vec<Sample>) {
        if self.state != ConnectionState::Streaming {
            trace!(state = %self.state, "dropping samples outside streaming");
            return;
        }
        if self.registry.records().record().is_stopped() {
            trace!(count = samples.len(), "stopped; discarding batch");
            return;
        }

        let batch = SampleBatch::new(id, samples);
        let received_at = OffsetDateTime::now_utc();
        for sample in batch.samples() {
            self.session_log
                .push(RecordedSample::new(received_at, sample.value()));
        }
        if let Some(mean) = batch.mean() {
            self.live_value = mean;
            self.registry.records_mut().record_sample(mean);
        }

        let _ = self.samples.send(batch.clone());
        let _ = self.events.send(LinkEvent::Samples(batch));
        self.publish_snapshot();
    }

    fn handle_scan_event(&mut self, event: ScanEvent) {
        if let Some(list) = self.registry.observe(event) {
            let _ = self.events.send(LinkEvent::Discovered(list));
        }
    }

    /// Applies one input; returns whether it was legal in the current state.
    fn apply(&mut self, input: LinkInput) -> bool {
        let Some(next) = transition(self.state, input) else {
            debug!(state = %self.state, ?input, "ignoring input not valid in this state");
            return false;
        };
        if next == self.state {
            return true;
        }

        self.state = next;
        if next == ConnectionState::Disconnected {
            self.live_value = 0;
        }
        let change = StateChange::new(next, self.device_label());
        info!(state = %next, device = ?change.device_name(), "connection state changed");
        let _ = self.states.send(change.clone());
        let _ = self.events.send(LinkEvent::StateChanged(change));
        self.publish_snapshot();
        true
    }

    fn device_label(&self) -> Option<String> {
        self.session
            .as_ref()
            .map(|session| session.identity().display_label().to_string())
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(LinkSnapshot::new(
            self.state,
            self.device_label(),
            self.live_value,
        ));
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
