use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::state::ConnectionState;

/// Errors returned by radio transport and link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("peripheral `{address}` is not known to the radio")]
    PeripheralNotFound { address: String },
    #[error("peripheral `{address}` refused the connection")]
    ConnectRefused { address: String },
    #[error("timed out while in the `{phase}` phase")]
    Timeout { phase: ConnectionState },
    #[error("required service `{uuid}` was not found on the connected peripheral")]
    MissingService { uuid: String },
    #[error("required characteristic `{uuid}` was not found on the connected peripheral")]
    MissingCharacteristic { uuid: String },
    #[error("characteristic `{uuid}` does not support notifications")]
    NotifyUnsupported { uuid: String },
    #[error("the peripheral rejected enabling notifications on `{uuid}`")]
    NotifyRejected { uuid: String },
    #[error("the sensor link supervisor is no longer running")]
    SupervisorStopped,
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

/// Errors returned when parsing fake transport fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields (address|name|rssi)")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("notification payload `{value}` is not valid hexadecimal")]
    InvalidHex {
        value: String,
        source: hex::FromHexError,
    },
    #[error("unknown fake failure mode `{value}`")]
    UnknownFailureMode { value: String },
}

/// Errors returned while loading or persisting the session record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to access session record at `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("session record at `{}` is not valid JSON", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialise the session record")]
    Serialise(#[source] serde_json::Error),
}

/// Errors returned while exporting recorded samples.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("there are no samples to export")]
    NoSamples,
    #[error("failed to write export output")]
    Io(#[from] std::io::Error),
    #[error("failed to format export timestamp")]
    Timestamp(#[from] time::error::Format),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum SensorLinkError {
    #[error(transparent)]
    #[from(LinkError, Box<LinkError>)]
    Link(Box<LinkError>),
    #[error(transparent)]
    #[from(RecordError, Box<RecordError>)]
    Record(Box<RecordError>),
    #[error(transparent)]
    #[from(ExportError, Box<ExportError>)]
    Export(Box<ExportError>),
}
