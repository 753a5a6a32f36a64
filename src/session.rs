use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::config::{GattRequirement, LinkConfig};
use crate::decoder::PayloadDecoder;
use crate::error::LinkError;
use crate::hw::{LinkHandle, NotificationStream, RadioTransport, negotiate_notify_endpoint};
use crate::model::{PeripheralIdentity, Sample, SessionId};
use crate::state::ConnectionState;

/// Progress reported by a session task to the supervisor.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    LinkEstablished,
    Streaming,
    Samples(Vec<Sample>),
    Closed(CloseReason),
}

/// Why a session task finished. The link is already released when this is sent.
#[derive(Debug)]
pub(crate) enum CloseReason {
    ConnectFailed(LinkError),
    SetupFailed(LinkError),
    LinkLost,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct SessionReport {
    pub(crate) id: SessionId,
    pub(crate) event: SessionEvent,
}

/// One physical link attempt, driven by its own task.
#[derive(Debug)]
pub(crate) struct ConnectionSession {
    id: SessionId,
    identity: PeripheralIdentity,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectionSession {
    pub(crate) fn spawn(
        id: SessionId,
        identity: PeripheralIdentity,
        transport: Arc<dyn RadioTransport>,
        config: &LinkConfig,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let span = info_span!("session", session_id = %id, address = identity.address());
        let task = SessionTask {
            id,
            identity: identity.clone(),
            transport,
            gatt: config.gatt().clone(),
            connect_timeout: config.connect_timeout(),
            discovery_timeout: config.discovery_timeout(),
            cancel: cancel.clone(),
            reports,
        };

        Self {
            id,
            identity,
            cancel,
            task: tokio::spawn(task.run().instrument(span)),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    /// Cancels the session and waits until its link has been released.
    pub(crate) async fn teardown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, session_id = %self.id, "session task ended abnormally");
        }
    }
}

struct SessionTask {
    id: SessionId,
    identity: PeripheralIdentity,
    transport: Arc<dyn RadioTransport>,
    gatt: GattRequirement,
    connect_timeout: Duration,
    discovery_timeout: Duration,
    cancel: CancellationToken,
    reports: mpsc::UnboundedSender<SessionReport>,
}

impl SessionTask {
    async fn run(self) {
        let reason = self.drive().await;
        debug!(?reason, "session finished");
        self.report(SessionEvent::Closed(reason));
    }

    async fn drive(&self) -> CloseReason {
        // Dropping the connect future abandons the attempt; transports release half-open links.
        let connecting = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = timeout(self.connect_timeout, self.transport.connect(&self.identity)) => Some(result),
        };
        let mut link = match connecting {
            Some(Ok(Ok(link))) => link,
            Some(Ok(Err(error))) => return CloseReason::ConnectFailed(error),
            Some(Err(_elapsed)) => {
                return CloseReason::ConnectFailed(LinkError::Timeout {
                    phase: ConnectionState::Connecting,
                });
            }
            None => {
                debug!("connect attempt abandoned");
                return CloseReason::Cancelled;
            }
        };
        self.report(SessionEvent::LinkEstablished);

        let setup = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = timeout(self.discovery_timeout, prepare_stream(link.as_mut(), &self.gatt)) => Some(result),
        };
        let notifications = match setup {
            Some(Ok(Ok(notifications))) => notifications,
            Some(Ok(Err(error))) => {
                link.disconnect().await;
                return CloseReason::SetupFailed(error);
            }
            Some(Err(_elapsed)) => {
                link.disconnect().await;
                return CloseReason::SetupFailed(LinkError::Timeout {
                    phase: ConnectionState::ServiceDiscovery,
                });
            }
            None => {
                link.disconnect().await;
                return CloseReason::Cancelled;
            }
        };

        info!("streaming notifications");
        self.report(SessionEvent::Streaming);
        let reason = self.stream(notifications).await;
        link.disconnect().await;
        reason
    }

    async fn stream(&self, mut notifications: NotificationStream) -> CloseReason {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return CloseReason::Cancelled,
                payload = notifications.next() => {
                    let Some(payload) = payload else {
                        return CloseReason::LinkLost;
                    };
                    let samples = PayloadDecoder::decode(&payload, Instant::now());
                    if !samples.is_empty() {
                        self.report(SessionEvent::Samples(samples));
                    }
                }
            }
        }
    }

    fn report(&self, event: SessionEvent) {
        let report = SessionReport { id: self.id, event };
        if self.reports.send(report).is_err() {
            trace!("supervisor no longer listening");
        }
    }
}

async fn prepare_stream(
    link: &mut dyn LinkHandle,
    gatt: &GattRequirement,
) -> Result<NotificationStream, LinkError> {
    let services = link.discover_services().await?;
    let characteristic_uuid = negotiate_notify_endpoint(&services, gatt)?.uuid().to_string();
    link.enable_notifications(&characteristic_uuid).await?;
    link.notifications().await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeBackendConfig, FakeFailure, FakeProbe, FakeTransport, ScanFixture};

    fn fake(failure: Option<FakeFailure>) -> (Arc<dyn RadioTransport>, FakeProbe) {
        let fixture: ScanFixture = "AA:BB|HRM-1|-40".parse().expect("fixture should parse");
        let transport = FakeTransport::new(
            FakeBackendConfig::builder()
                .scan_fixture(fixture)
                .maybe_failure(failure)
                .build(),
        );
        let probe = transport.probe();
        (Arc::new(transport), probe)
    }

    fn spawn(
        transport: Arc<dyn RadioTransport>,
    ) -> (ConnectionSession, mpsc::UnboundedReceiver<SessionReport>) {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::spawn(
            SessionId::FIRST,
            PeripheralIdentity::new("AA:BB", None),
            transport,
            &LinkConfig::default(),
            reports_tx,
        );
        (session, reports_rx)
    }

    async fn next_event(reports: &mut mpsc::UnboundedReceiver<SessionReport>) -> SessionEvent {
        let report = reports.recv().await.expect("session should report");
        assert_eq!(SessionId::FIRST, report.id);
        report.event
    }

    #[tokio::test(start_paused = true)]
    async fn session_reports_setup_then_samples() {
        let (transport, _probe) = fake(None);
        let (session, mut reports) = spawn(transport);

        assert_matches!(next_event(&mut reports).await, SessionEvent::LinkEstablished);
        assert_matches!(next_event(&mut reports).await, SessionEvent::Streaming);
        assert_matches!(
            next_event(&mut reports).await,
            SessionEvent::Samples(samples) if samples.len() == 1 && samples[0].value() == 0x48
        );
        session.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_closes_without_a_link() {
        let (transport, probe) = fake(Some(FakeFailure::Connect));
        let (_session, mut reports) = spawn(transport);

        assert_matches!(
            next_event(&mut reports).await,
            SessionEvent::Closed(CloseReason::ConnectFailed(LinkError::ConnectRefused { .. }))
        );
        assert_eq!(0, probe.max_concurrent_links());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_releases_the_link() {
        let (transport, probe) = fake(Some(FakeFailure::Discovery));
        let (_session, mut reports) = spawn(transport);

        assert_matches!(next_event(&mut reports).await, SessionEvent::LinkEstablished);
        assert_matches!(
            next_event(&mut reports).await,
            SessionEvent::Closed(CloseReason::SetupFailed(LinkError::MissingService { .. }))
        );
        assert_eq!(1, probe.released_links());
        assert_eq!(0, probe.active_links());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_is_reported_once_released() {
        let (transport, probe) = fake(Some(FakeFailure::Drop));
        let (_session, mut reports) = spawn(transport);

        let closed = loop {
            if let SessionEvent::Closed(reason) = next_event(&mut reports).await {
                break reason;
            }
        };
        assert_matches!(closed, CloseReason::LinkLost);
        assert_eq!(1, probe.released_links());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_connect_abandons_the_attempt() {
        let (transport, probe) = fake(None);
        let (session, mut reports) = spawn(transport);

        tokio::task::yield_now().await;
        let started = Instant::now();
        session.teardown().await;

        assert!(started.elapsed() < Duration::from_millis(20));
        assert_matches!(
            next_event(&mut reports).await,
            SessionEvent::Closed(CloseReason::Cancelled)
        );
        assert_eq!(0, probe.max_concurrent_links());
        assert_eq!(0, probe.active_links());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_times_out() {
        let transport = FakeTransport::new(
            FakeBackendConfig::builder()
                .scan_fixture("AA:BB|HRM-1|-40".parse().expect("fixture should parse"))
                .connect_delay(Duration::from_secs(30))
                .build(),
        );
        let (reports_tx, mut reports) = mpsc::unbounded_channel();
        let config = LinkConfig::builder()
            .connect_timeout(Duration::from_secs(1))
            .build();
        let _session = ConnectionSession::spawn(
            SessionId::FIRST,
            PeripheralIdentity::new("AA:BB", None),
            Arc::new(transport),
            &config,
            reports_tx,
        );

        assert_matches!(
            next_event(&mut reports).await,
            SessionEvent::Closed(CloseReason::ConnectFailed(LinkError::Timeout {
                phase: ConnectionState::Connecting
            }))
        );
    }
}
