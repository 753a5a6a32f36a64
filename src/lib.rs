mod app;
mod cli;
mod config;
mod decoder;
mod error;
mod export;
mod hw;
mod link;
mod model;
mod record;
mod registry;
mod session;
mod state;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RadioBackend, RunContext, run, run_with_clients};
pub use cli::{Args, Command, FakeArgs, ListenArgs, LogLevel, OutputFormat, StoppedArgs};
pub use config::{GattRequirement, LinkConfig, SENSOR_DATA_UUID, SENSOR_SERVICE_UUID};
pub use decoder::{BURST_LEN, FrameError, PayloadDecoder, SINGLE_SAMPLE_LEN};
pub use error::{ExportError, FixtureError, LinkError, RecordError, SensorLinkError};
pub use export::{export_file_name, export_session, export_to_path, write_delimited};
pub use hw::{
    AdvertisementStream, BtleplugTransport, CharacteristicInfo, FakeBackendConfig, FakeFailure,
    FakeProbe, FakeTransport, LinkHandle, NotificationPayloads, NotificationStream,
    RadioTransport, ScanFixture, ServiceInfo,
};
pub use link::{EventStream, SensorLink, SensorLinkHandle, Subscription};
pub use model::{
    Advertisement, LinkEvent, LinkSnapshot, PeripheralIdentity, RecordedSample, Sample,
    SampleBatch, SessionId, StateChange,
};
pub use record::{FileRecordStore, MemoryRecordStore, SessionRecord, SessionRecordStore};
pub use registry::DiscoveryFilter;
pub use state::ConnectionState;
pub use terminal::TerminalClient;
