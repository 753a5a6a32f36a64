use std::hash::{Hash, Hasher};

use derive_more::Display;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::state::ConnectionState;

/// Identity of a BLE peripheral, compared and hashed by address only.
#[derive(Debug, Clone, Serialize)]
pub struct PeripheralIdentity {
    address: String,
    display_name: Option<String>,
}

impl PeripheralIdentity {
    /// Creates a peripheral identity.
    #[must_use]
    pub fn new(address: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            address: address.into(),
            display_name,
        }
    }

    /// Returns the backend-specific peripheral address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the advertised display name, if one was seen.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns the display name, falling back to the address.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.display_name().unwrap_or(&self.address)
    }

    pub(crate) fn name_starts_with(&self, prefix: &str) -> bool {
        self.display_name
            .as_deref()
            .is_some_and(|name| name.starts_with(prefix))
    }
}

impl PartialEq for PeripheralIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeripheralIdentity {}

impl Hash for PeripheralIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// One advertisement observed during a scan window.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Advertisement {
    identity: PeripheralIdentity,
    rssi: Option<i16>,
}

impl Advertisement {
    /// Creates an advertisement record.
    #[must_use]
    pub fn new(identity: PeripheralIdentity, rssi: Option<i16>) -> Self {
        Self { identity, rssi }
    }

    /// Returns the advertising peripheral.
    #[must_use]
    pub fn identity(&self) -> &PeripheralIdentity {
        &self.identity
    }

    /// Returns the received signal strength, if reported.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub(crate) fn into_identity(self) -> PeripheralIdentity {
        self.identity
    }
}

/// Generation number of one connection attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) const FIRST: Self = Self(1);

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// One decoded sensor reading.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Sample {
    timestamp: Instant,
    value: u16,
}

impl Sample {
    pub(crate) fn new(timestamp: Instant, value: u16) -> Self {
        Self { timestamp, value }
    }

    /// Returns the monotonic capture time of the notification carrying this sample.
    #[must_use]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Returns the raw sample value.
    #[must_use]
    pub fn value(&self) -> u16 {
        self.value
    }
}

/// Samples decoded from one notification, delivered together in arrival order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SampleBatch {
    session_id: SessionId,
    samples: Vec<Sample>,
}

impl SampleBatch {
    pub(crate) fn new(session_id: SessionId, samples: Vec<Sample>) -> Self {
        Self {
            session_id,
            samples,
        }
    }

    /// Returns the session that produced this batch.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the decoded samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the raw values in arrival order.
    #[must_use]
    pub fn values(&self) -> Vec<u16> {
        self.samples.iter().map(Sample::value).collect()
    }

    /// Returns the rounded mean of the batch, or `None` for an empty batch.
    #[must_use]
    pub fn mean(&self) -> Option<u16> {
        if self.samples.is_empty() {
            return None;
        }

        let total: u64 = self.samples.iter().map(|s| u64::from(s.value)).sum();
        let count = self.samples.len() as u64;
        let rounded = (total + count / 2) / count;
        u16::try_from(rounded).ok()
    }
}

/// A connection-state change together with the peripheral it concerns.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StateChange {
    state: ConnectionState,
    device_name: Option<String>,
}

impl StateChange {
    pub(crate) fn new(state: ConnectionState, device_name: Option<String>) -> Self {
        Self { state, device_name }
    }

    /// Returns the new connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the peripheral label for link states.
    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

/// Typed events fanned out by the sensor link.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    /// The connection state changed.
    StateChanged(StateChange),
    /// One notification was accepted and decoded.
    Samples(SampleBatch),
    /// The discovered list of the current scan window changed.
    Discovered(Vec<Advertisement>),
}

/// Latest-wins view of the link for UI consumers.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct LinkSnapshot {
    state: ConnectionState,
    device_name: Option<String>,
    live_value: u16,
}

impl LinkSnapshot {
    pub(crate) fn new(state: ConnectionState, device_name: Option<String>, live_value: u16) -> Self {
        Self {
            state,
            device_name,
            live_value,
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the connected or connecting peripheral label.
    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Returns the latest accepted value, `0` once the link is down.
    #[must_use]
    pub fn live_value(&self) -> u16 {
        self.live_value
    }
}

/// A sample kept in the session log with its wall-clock receive time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RecordedSample {
    received_at: OffsetDateTime,
    value: u16,
}

impl RecordedSample {
    /// Creates a recorded sample.
    #[must_use]
    pub fn new(received_at: OffsetDateTime, value: u16) -> Self {
        Self { received_at, value }
    }

    /// Returns the wall-clock receive time.
    #[must_use]
    pub fn received_at(&self) -> OffsetDateTime {
        self.received_at
    }

    /// Returns the sample value.
    #[must_use]
    pub fn value(&self) -> u16 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn identities_compare_by_address_only() {
        let named = PeripheralIdentity::new("AA:BB", Some("Polar H10".to_string()));
        let unnamed = PeripheralIdentity::new("AA:BB", None);

        assert_eq!(named, unnamed);
        let set: HashSet<_> = [named, unnamed].into_iter().collect();
        assert_eq!(1, set.len());
    }

    #[test]
    fn display_label_falls_back_to_address() {
        let unnamed = PeripheralIdentity::new("AA:BB", None);
        assert_eq!("AA:BB", unnamed.display_label());
    }

    #[rstest]
    #[case(&[], None)]
    #[case(&[1000], Some(1000))]
    #[case(&[1, 2], Some(2))]
    #[case(&[10, 20, 31], Some(20))]
    #[case(&[u16::MAX, u16::MAX], Some(u16::MAX))]
    fn batch_mean_is_rounded(#[case] values: &[u16], #[case] expected: Option<u16>) {
        let now = Instant::now();
        let samples = values.iter().map(|value| Sample::new(now, *value)).collect();
        let batch = SampleBatch::new(SessionId::FIRST, samples);
        assert_eq!(expected, batch.mean());
    }

    #[test]
    fn session_ids_increase() {
        let first = SessionId::FIRST;
        assert!(first.next() > first);
        assert_eq!("2", first.next().to_string());
    }
}
