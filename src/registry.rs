use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, trace, warn};

use crate::error::LinkError;
use crate::hw::RadioTransport;
use crate::model::{Advertisement, PeripheralIdentity};
use crate::record::RecordBook;

/// Restricts which advertisements a scan reports.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DiscoveryFilter {
    name_prefix: Option<String>,
}

impl DiscoveryFilter {
    /// Accepts every advertisement.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Accepts advertisements whose name starts with `prefix`.
    #[must_use]
    pub fn name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
        }
    }

    fn accepts(&self, advertisement: &Advertisement) -> bool {
        self.name_prefix
            .as_deref()
            .is_none_or(|prefix| advertisement.identity().name_starts_with(prefix))
    }
}

/// Generation of one scan window.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct ScanId(u64);

/// An advertisement forwarded from a scan into the supervisor queue.
#[derive(Debug)]
pub(crate) struct ScanEvent {
    scan_id: ScanId,
    advertisement: Advertisement,
}

#[derive(Debug)]
struct ActiveScan {
    id: ScanId,
    filter: DiscoveryFilter,
    forwarder: JoinHandle<()>,
}

/// Saved identity plus the candidates of the current scan window.
#[derive(Debug)]
pub(crate) struct DeviceRegistry {
    transport: Arc<dyn RadioTransport>,
    records: RecordBook,
    discovered: IndexMap<String, Advertisement>,
    discovered_tx: watch::Sender<Vec<Advertisement>>,
    scan_tx: mpsc::UnboundedSender<ScanEvent>,
    active: Option<ActiveScan>,
    next_scan: u64,
}

impl DeviceRegistry {
    pub(crate) fn new(
        transport: Arc<dyn RadioTransport>,
        records: RecordBook,
        scan_tx: mpsc::UnboundedSender<ScanEvent>,
    ) -> Self {
        let (discovered_tx, _) = watch::channel(Vec::new());
        Self {
            transport,
            records,
            discovered: IndexMap::new(),
            discovered_tx,
            scan_tx,
            active: None,
            next_scan: 0,
        }
    }

    pub(crate) fn watch_discovered(&self) -> watch::Receiver<Vec<Advertisement>> {
        self.discovered_tx.subscribe()
    }

    pub(crate) fn records(&self) -> &RecordBook {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut RecordBook {
        &mut self.records
    }

    pub(crate) fn into_records(self) -> RecordBook {
        self.records
    }

    /// Returns the identity persisted by the last successful stream.
    pub(crate) fn saved_identity(&self) -> Option<PeripheralIdentity> {
        self.records.record().saved_identity()
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.active.is_some()
    }

    /// Clears the discovered set and starts a fresh scan window.
    ///
    /// The cleared list is published before the radio is asked to scan.
    #[instrument(skip(self), level = "debug")]
    pub(crate) async fn start_scan(&mut self, filter: DiscoveryFilter) -> Result<(), LinkError> {
        self.stop_scan().await;
        self.discovered.clear();
        self.discovered_tx.send_replace(Vec::new());

        let mut advertisements = self.transport.start_scan().await?;
        self.next_scan += 1;
        let id = ScanId(self.next_scan);
        let scan_tx = self.scan_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(advertisement) = advertisements.next().await {
                let event = ScanEvent {
                    scan_id: id,
                    advertisement,
                };
                if scan_tx.send(event).is_err() {
                    break;
                }
            }
            trace!("scan forwarder finished");
        });

        self.active = Some(ActiveScan {
            id,
            filter,
            forwarder,
        });
        Ok(())
    }

    /// Stops the running scan. Safe to call when no scan is running.
    pub(crate) async fn stop_scan(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.forwarder.abort();
        if let Err(error) = self.transport.stop_scan().await {
            warn!(%error, "failed to stop scan");
        }
        debug!("scan stopped");
    }

    /// Folds one advertisement into the discovered set.
    ///
    /// Returns the updated list when a new address was added.
    pub(crate) fn observe(&mut self, event: ScanEvent) -> Option<Vec<Advertisement>> {
        let active = self.active.as_ref()?;
        if active.id != event.scan_id {
            trace!("dropping advertisement from a finished scan");
            return None;
        }
        if !active.filter.accepts(&event.advertisement) {
            return None;
        }

        let address = event.advertisement.identity().address().to_string();
        if self.discovered.contains_key(&address) {
            return None;
        }
        debug!(%address, rssi = ?event.advertisement.rssi(), "discovered peripheral");
        self.discovered.insert(address, event.advertisement);

        let list: Vec<Advertisement> = self.discovered.values().cloned().collect();
        self.discovered_tx.send_replace(list.clone());
        Some(list)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hw::{FakeBackendConfig, FakeTransport, ScanFixture};
    use crate::record::MemoryRecordStore;

    fn registry(fixture: &str) -> (DeviceRegistry, mpsc::UnboundedReceiver<ScanEvent>) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let transport = FakeTransport::new(FakeBackendConfig::builder().scan_fixture(fixture).build());
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let records = RecordBook::open(Box::new(MemoryRecordStore::default()));
        (
            DeviceRegistry::new(Arc::new(transport), records, scan_tx),
            scan_rx,
        )
    }

    fn addresses(list: &[Advertisement]) -> Vec<&str> {
        list.iter()
            .map(|advertisement| advertisement.identity().address())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn scan_deduplicates_by_address_in_arrival_order() {
        let (mut registry, mut scan_rx) = registry("BB|HRM-2|-50;AA|HRM-1|-40;BB|HRM-2|-45");
        registry
            .start_scan(DiscoveryFilter::any())
            .await
            .expect("scan should start");

        let mut emitted = Vec::new();
        for _ in 0..3 {
            let event = scan_rx.recv().await.expect("advertisement should arrive");
            if let Some(list) = registry.observe(event) {
                emitted.push(addresses(&list).join(","));
            }
        }

        assert_eq!(vec!["BB", "BB,AA"], emitted);
        assert_eq!(2, registry.watch_discovered().borrow().len());
    }

    #[tokio::test(start_paused = true)]
    async fn new_scan_publishes_an_empty_list_first() {
        let (mut registry, mut scan_rx) = registry("AA|HRM-1|-40");
        let discovered = registry.watch_discovered();
        registry
            .start_scan(DiscoveryFilter::any())
            .await
            .expect("scan should start");
        let event = scan_rx.recv().await.expect("advertisement should arrive");
        registry.observe(event);
        assert_eq!(1, discovered.borrow().len());

        registry
            .start_scan(DiscoveryFilter::any())
            .await
            .expect("scan should restart");
        assert!(discovered.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn filter_skips_non_matching_names() {
        let (mut registry, mut scan_rx) = registry("AA|Speaker|-40;BB|HRM-2|-41");
        registry
            .start_scan(DiscoveryFilter::name_prefix("HRM"))
            .await
            .expect("scan should start");

        let first = scan_rx.recv().await.expect("first advertisement");
        assert_eq!(None, registry.observe(first));
        let second = scan_rx.recv().await.expect("second advertisement");
        let list = registry.observe(second).expect("matching peripheral is added");
        assert_eq!(vec!["BB"], addresses(&list));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_scan_is_idempotent_and_drops_late_events() {
        let (mut registry, mut scan_rx) = registry("AA|HRM-1|-40");
        registry
            .start_scan(DiscoveryFilter::any())
            .await
            .expect("scan should start");
        registry.stop_scan().await;
        registry.stop_scan().await;
        assert!(!registry.is_scanning());

        let late = ScanEvent {
            scan_id: ScanId(1),
            advertisement: Advertisement::new(PeripheralIdentity::new("AA", None), None),
        };
        assert_eq!(None, registry.observe(late));
        assert!(scan_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn saved_identity_comes_from_the_record() {
        let (mut registry, _scan_rx) = registry("AA|HRM-1|-40");
        assert_eq!(None, registry.saved_identity());

        registry
            .records_mut()
            .remember_identity(&PeripheralIdentity::new("AA", Some("HRM-1".to_string())));
        assert_eq!(
            Some(PeripheralIdentity::new("AA", None)),
            registry.saved_identity()
        );
    }
}
