use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, trace, warn};

use super::cleanup::CleanupGuard;
use super::model::{CharacteristicInfo, ServiceInfo};
use super::transport::{AdvertisementStream, LinkHandle, NotificationStream, RadioTransport};
use crate::error::LinkError;
use crate::model::{Advertisement, PeripheralIdentity};

const PERIPHERAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const STREAM_BUFFER: usize = 64;

/// Radio transport backed by `btleplug` and the first available adapter.
#[derive(Debug)]
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Opens the platform BLE manager and selects the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error when the BLE stack is unavailable or has no adapters.
    #[instrument(level = "debug")]
    pub async fn new() -> Result<Self, LinkError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(LinkError::NoAdapters)?;
        let adapter_name = adapter.adapter_info().await?;
        info!(adapter = %adapter_name, "using BLE adapter");
        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, LinkError> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|peripheral| peripheral.id().to_string() == address))
    }

    /// Scans until the adapter has seen `address`. The scan stops on every exit path.
    async fn scan_for_peripheral(&self, address: &str) -> Result<Peripheral, LinkError> {
        debug!("peripheral not cached; scanning until it advertises");
        self.adapter.start_scan(ScanFilter::default()).await?;
        let adapter = self.adapter.clone();
        let lookup_scan = CleanupGuard::new("lookup scan", async move {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        });

        let found = loop {
            if let Some(peripheral) = self.find_peripheral(address).await? {
                break peripheral;
            }
            sleep(PERIPHERAL_POLL_INTERVAL).await;
        };
        lookup_scan.run().await;
        Ok(found)
    }
}

#[async_trait]
impl RadioTransport for BtleplugTransport {
    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementStream, LinkError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = sender.closed() => break,
                    event = events.next() => event,
                };
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id)) => id,
                    Some(_) => continue,
                    None => break,
                };
                let Some(advertisement) = advertisement_for(&adapter, &id).await else {
                    continue;
                };
                if sender.send(advertisement).await.is_err() {
                    break;
                }
            }
            trace!("advertisement forwarder finished");
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), LinkError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(address = identity.address()))]
    async fn connect(
        &self,
        identity: &PeripheralIdentity,
    ) -> Result<Box<dyn LinkHandle>, LinkError> {
        let peripheral = match self.find_peripheral(identity.address()).await? {
            Some(peripheral) => peripheral,
            None => self.scan_for_peripheral(identity.address()).await?,
        };

        let pending = {
            let peripheral = peripheral.clone();
            CleanupGuard::new("pending connection", async move {
                if let Err(error) = peripheral.disconnect().await {
                    debug!(?error, "failed to release abandoned connection");
                }
            })
        };
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        pending.disarm();
        info!("connected to peripheral");

        Ok(Box::new(BtleplugLink {
            adapter: self.adapter.clone(),
            peripheral,
            subscribed: None,
        }))
    }
}

async fn advertisement_for(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(error) => {
            debug!(?error, "discovered peripheral vanished before lookup");
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(properties) => properties?,
        Err(error) => {
            debug!(?error, "failed to read advertisement properties");
            return None;
        }
    };

    Some(Advertisement::new(
        PeripheralIdentity::new(peripheral.id().to_string(), properties.local_name),
        properties.rssi,
    ))
}

#[derive(Debug)]
struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
    subscribed: Option<Characteristic>,
}

#[async_trait]
impl LinkHandle for BtleplugLink {
    #[instrument(skip(self), level = "debug")]
    async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, LinkError> {
        self.peripheral.discover_services().await?;
        Ok(collect_services(&self.peripheral))
    }

    #[instrument(skip(self), level = "debug")]
    async fn enable_notifications(&mut self, characteristic_uuid: &str) -> Result<(), LinkError> {
        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| {
                characteristic
                    .uuid
                    .to_string()
                    .eq_ignore_ascii_case(characteristic_uuid)
            })
            .ok_or_else(|| LinkError::MissingCharacteristic {
                uuid: characteristic_uuid.to_string(),
            })?;

        if let Err(error) = self.peripheral.subscribe(&characteristic).await {
            warn!(?error, "peripheral rejected notification subscription");
            return Err(LinkError::NotifyRejected {
                uuid: characteristic_uuid.to_string(),
            });
        }
        self.subscribed = Some(characteristic);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn notifications(&mut self) -> Result<NotificationStream, LinkError> {
        let expected_uuid = self
            .subscribed
            .as_ref()
            .map(|characteristic| characteristic.uuid)
            .ok_or_else(|| LinkError::NotifyRejected {
                uuid: "<none>".to_string(),
            })?;
        let mut notifications = self.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;
        let peripheral_id = self.peripheral.id();

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = sender.closed() => break,
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            debug!("notification stream closed");
                            break;
                        };
                        if notification.uuid != expected_uuid {
                            continue;
                        }
                        if sender.send(notification.value).await.is_err() {
                            break;
                        }
                    }
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                            info!("peripheral dropped the link");
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(self: Box<Self>) {
        if let Some(characteristic) = &self.subscribed
            && let Err(error) = self.peripheral.unsubscribe(characteristic).await
        {
            debug!(?error, "failed to unsubscribe before disconnect");
        }

        match self.peripheral.is_connected().await {
            Ok(true) => {
                if let Err(error) = self.peripheral.disconnect().await {
                    warn!(?error, "failed to disconnect peripheral");
                }
            }
            Ok(false) => trace!("peripheral already disconnected"),
            Err(error) => debug!(?error, "failed to query connection status"),
        }
    }
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    let mut services: Vec<ServiceInfo> = peripheral
        .services()
        .into_iter()
        .map(|service| {
            let mut characteristics: Vec<CharacteristicInfo> = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid.to_string(),
                        property_labels(characteristic.properties),
                    )
                })
                .collect();
            characteristics.sort_by(|left, right| left.uuid().cmp(right.uuid()));
            ServiceInfo::new(service.uuid.to_string(), characteristics)
        })
        .collect();
    services.sort_by(|left, right| left.uuid().cmp(right.uuid()));
    services
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}
