use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use super::model::ServiceInfo;
use crate::error::LinkError;
use crate::model::{Advertisement, PeripheralIdentity};

/// Advertisements observed while a scan is running.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

/// Raw notification payloads; the stream ends when the link drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Radio access used by the sensor link.
#[async_trait]
pub trait RadioTransport: Send + Sync + std::fmt::Debug {
    /// Starts scanning and returns the advertisement stream.
    async fn start_scan(&self) -> Result<AdvertisementStream, LinkError>;

    /// Stops any running scan. Calling this without a running scan is a no-op.
    async fn stop_scan(&self) -> Result<(), LinkError>;

    /// Establishes a physical link to a peripheral.
    ///
    /// The returned future may be dropped before it completes. Implementations
    /// release anything a dropped attempt left open, including lookup scans.
    async fn connect(
        &self,
        identity: &PeripheralIdentity,
    ) -> Result<Box<dyn LinkHandle>, LinkError>;
}

/// An established physical link. Consumed by [`LinkHandle::disconnect`].
#[async_trait]
pub trait LinkHandle: Send + std::fmt::Debug {
    /// Resolves the GATT services of the peripheral.
    async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, LinkError>;

    /// Enables notifications on one characteristic.
    async fn enable_notifications(&mut self, characteristic_uuid: &str) -> Result<(), LinkError>;

    /// Returns the payload stream of the enabled characteristic.
    async fn notifications(&mut self) -> Result<NotificationStream, LinkError>;

    /// Releases the link. Failures are logged by the implementation.
    async fn disconnect(self: Box<Self>);
}
