mod btleplug_backend;
mod cleanup;
mod fake_backend;
mod gatt;
mod model;
mod transport;

pub use self::btleplug_backend::BtleplugTransport;
pub use self::fake_backend::{
    FakeBackendConfig, FakeFailure, FakeProbe, FakeTransport, NotificationPayloads, ScanFixture,
};
pub(crate) use self::gatt::negotiate_notify_endpoint;
pub use self::model::{CharacteristicInfo, ServiceInfo};
pub use self::transport::{AdvertisementStream, LinkHandle, NotificationStream, RadioTransport};
