use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use strum_macros::{Display, EnumString};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument};

use super::model::{CharacteristicInfo, ServiceInfo};
use super::transport::{AdvertisementStream, LinkHandle, NotificationStream, RadioTransport};
use crate::config::{SENSOR_DATA_UUID, SENSOR_SERVICE_UUID};
use crate::error::{FixtureError, LinkError};
use crate::model::{Advertisement, PeripheralIdentity};

const DEFAULT_NOTIFICATIONS: [[u8; 2]; 3] = [[0x00, 0x48], [0x00, 0x4A], [0x00, 0x49]];

/// Parsed fake scan fixture records.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    advertisements: Vec<Advertisement>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let advertisements = parse_scan_fixture(value)?;
        Ok(Self { advertisements })
    }
}

/// Parsed fake notification payload fixtures.
#[derive(Debug, Clone, derive_more::Into)]
pub struct NotificationPayloads {
    payloads: Vec<Vec<u8>>,
}

impl FromStr for NotificationPayloads {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let payloads = parse_notifications(value)?;
        Ok(Self { payloads })
    }
}

/// Failure injected by the fake radio.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FakeFailure {
    /// The peripheral refuses every connection.
    Connect,
    /// The peripheral does not expose the sensor service.
    Discovery,
    /// Enabling notifications is rejected.
    Notify,
    /// The link drops after the notification fixtures have played once.
    Drop,
}

impl FakeFailure {
    /// Parses a failure mode name.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is not a known failure mode.
    pub fn parse(value: &str) -> Result<Self, FixtureError> {
        Self::from_str(value.trim()).map_err(|_error| FixtureError::UnknownFailureMode {
            value: value.to_string(),
        })
    }
}

/// Counters describing how the fake radio was used.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    counters: Arc<ProbeCounters>,
}

#[derive(Debug, Default)]
struct ProbeCounters {
    connect_attempts: AtomicUsize,
    active_links: AtomicUsize,
    released_links: AtomicUsize,
    max_concurrent_links: AtomicUsize,
}

impl FakeProbe {
    /// Returns how many connections were attempted.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.counters.connect_attempts.load(Ordering::SeqCst)
    }

    /// Returns how many links are currently open.
    #[must_use]
    pub fn active_links(&self) -> usize {
        self.counters.active_links.load(Ordering::SeqCst)
    }

    /// Returns how many links were explicitly disconnected.
    #[must_use]
    pub fn released_links(&self) -> usize {
        self.counters.released_links.load(Ordering::SeqCst)
    }

    /// Returns the highest number of links that were open at the same time.
    #[must_use]
    pub fn max_concurrent_links(&self) -> usize {
        self.counters.max_concurrent_links.load(Ordering::SeqCst)
    }

    fn open_link(&self) -> OpenLinkGuard {
        let open = self.counters.active_links.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_concurrent_links
            .fetch_max(open, Ordering::SeqCst);
        OpenLinkGuard {
            counters: Arc::clone(&self.counters),
        }
    }
}

#[derive(Debug)]
struct OpenLinkGuard {
    counters: Arc<ProbeCounters>,
}

impl Drop for OpenLinkGuard {
    fn drop(&mut self) {
        self.counters.active_links.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Settings for constructing a fake radio.
#[derive(Debug, Builder)]
pub struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    notifications: Option<NotificationPayloads>,
    failure: Option<FakeFailure>,
    #[builder(default = Duration::from_millis(50))]
    advertisement_interval: Duration,
    #[builder(default = Duration::from_millis(20))]
    connect_delay: Duration,
    #[builder(default)]
    discovery_delay: Duration,
    #[builder(default = Duration::from_millis(250))]
    notification_interval: Duration,
    #[builder(default)]
    probe: FakeProbe,
}

/// Fake radio used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeTransport {
    advertisements: Vec<Advertisement>,
    notifications: Vec<Vec<u8>>,
    failure: Option<FakeFailure>,
    advertisement_interval: Duration,
    connect_delay: Duration,
    discovery_delay: Duration,
    notification_interval: Duration,
    probe: FakeProbe,
}

impl FakeTransport {
    /// Creates a fake radio from explicit settings.
    #[must_use]
    pub fn new(config: FakeBackendConfig) -> Self {
        let notifications = config.notifications.map_or_else(
            || DEFAULT_NOTIFICATIONS.map(Vec::from).to_vec(),
            Into::into,
        );

        Self {
            advertisements: config.scan_fixture.into(),
            notifications,
            failure: config.failure,
            advertisement_interval: config.advertisement_interval,
            connect_delay: config.connect_delay,
            discovery_delay: config.discovery_delay,
            notification_interval: config.notification_interval,
            probe: config.probe,
        }
    }

    /// Returns the usage counters shared with every link of this radio.
    #[must_use]
    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl RadioTransport for FakeTransport {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementStream, LinkError> {
        let (sender, receiver) = mpsc::channel(self.advertisements.len().max(1));
        let advertisements = self.advertisements.clone();
        let interval = self.advertisement_interval;

        tokio::spawn(async move {
            for advertisement in advertisements {
                sleep(interval).await;
                if sender.send(advertisement).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(address = identity.address()))]
    async fn connect(
        &self,
        identity: &PeripheralIdentity,
    ) -> Result<Box<dyn LinkHandle>, LinkError> {
        self.probe
            .counters
            .connect_attempts
            .fetch_add(1, Ordering::SeqCst);
        sleep(self.connect_delay).await;

        let known = self
            .advertisements
            .iter()
            .any(|advertisement| advertisement.identity() == identity);
        if !known {
            return Err(LinkError::PeripheralNotFound {
                address: identity.address().to_string(),
            });
        }
        if self.failure == Some(FakeFailure::Connect) {
            return Err(LinkError::ConnectRefused {
                address: identity.address().to_string(),
            });
        }

        info!("fake link established");
        Ok(Box::new(FakeLink {
            notifications: self.notifications.clone(),
            failure: self.failure,
            discovery_delay: self.discovery_delay,
            notification_interval: self.notification_interval,
            enabled: None,
            probe: self.probe.clone(),
            _open: self.probe.open_link(),
        }))
    }
}

#[derive(Debug)]
struct FakeLink {
    notifications: Vec<Vec<u8>>,
    failure: Option<FakeFailure>,
    discovery_delay: Duration,
    notification_interval: Duration,
    enabled: Option<String>,
    probe: FakeProbe,
    _open: OpenLinkGuard,
}

#[async_trait]
impl LinkHandle for FakeLink {
    async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, LinkError> {
        if !self.discovery_delay.is_zero() {
            sleep(self.discovery_delay).await;
        }
        if self.failure == Some(FakeFailure::Discovery) {
            return Ok(vec![ServiceInfo::new(
                "0000180a-0000-1000-8000-00805f9b34fb",
                Vec::new(),
            )]);
        }
        Ok(sensor_services())
    }

    async fn enable_notifications(&mut self, characteristic_uuid: &str) -> Result<(), LinkError> {
        if self.failure == Some(FakeFailure::Notify) {
            return Err(LinkError::NotifyRejected {
                uuid: characteristic_uuid.to_string(),
            });
        }
        self.enabled = Some(characteristic_uuid.to_string());
        Ok(())
    }

    async fn notifications(&mut self) -> Result<NotificationStream, LinkError> {
        let (sender, receiver) = mpsc::channel(1);
        let payloads = self.notifications.clone();
        let interval = self.notification_interval;
        let single_pass = self.failure == Some(FakeFailure::Drop);

        tokio::spawn(async move {
            if payloads.is_empty() {
                sender.closed().await;
                return;
            }
            loop {
                for payload in &payloads {
                    sleep(interval).await;
                    if sender.send(payload.clone()).await.is_err() {
                        return;
                    }
                }
                if single_pass {
                    debug!("fake link dropping after fixture pass");
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn disconnect(self: Box<Self>) {
        self.probe
            .counters
            .released_links
            .fetch_add(1, Ordering::SeqCst);
        debug!(enabled = ?self.enabled, "fake link released");
    }
}

fn sensor_services() -> Vec<ServiceInfo> {
    vec![ServiceInfo::new(
        SENSOR_SERVICE_UUID,
        vec![CharacteristicInfo::new(
            SENSOR_DATA_UUID,
            vec!["read".to_string(), "notify".to_string()],
        )],
    )]
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<Advertisement>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .map(parse_scan_record)
        .collect::<Result<Vec<_>, _>>()
}

fn parse_scan_record(raw_record: &str) -> Result<Advertisement, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [address, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if address.is_empty() || name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let display_name = (*name != "-").then(|| (*name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(Advertisement::new(
        PeripheralIdentity::new(*address, display_name),
        rssi,
    ))
}

fn parse_notifications(raw_value: &str) -> Result<Vec<Vec<u8>>, FixtureError> {
    if raw_value.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw_value.split(',').map(parse_hex).collect()
}

fn parse_hex(raw_value: &str) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|source| FixtureError::InvalidHex {
        value: cleaned,
        source,
    })
}
