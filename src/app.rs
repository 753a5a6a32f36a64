use std::io;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use tracing::{debug, instrument};

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::hw::{BtleplugTransport, FakeTransport, RadioTransport};
use crate::link::{SensorLink, SensorLinkHandle};
use crate::record::SessionRecordStore;
use crate::registry::DiscoveryFilter;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Radio used by commands that talk to a peripheral.
#[derive(Debug)]
pub enum RadioBackend {
    /// The platform BLE stack through `btleplug`.
    Bluetooth,
    /// Fixture-driven fake radio.
    Fake(FakeArgs),
}

impl RadioBackend {
    /// Selects the fake radio when fake arguments are present.
    #[must_use]
    pub fn from_fake_args(fake_args: Option<FakeArgs>) -> Self {
        fake_args.map_or(Self::Bluetooth, Self::Fake)
    }

    /// Opens the radio.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform BLE stack has no usable adapter.
    pub async fn open(self) -> Result<Arc<dyn RadioTransport>, LinkError> {
        match self {
            Self::Bluetooth => Ok(Arc::new(BtleplugTransport::new().await?)),
            Self::Fake(fake_args) => Ok(Arc::new(FakeTransport::new(
                fake_args.into_backend_config(),
            ))),
        }
    }
}

/// Everything a command run needs besides the command itself.
#[derive(Debug, Builder)]
pub struct RunContext {
    backend: RadioBackend,
    store: Box<dyn SessionRecordStore>,
    #[builder(default)]
    config: LinkConfig,
    #[builder(default)]
    filter: DiscoveryFilter,
    #[builder(default = OutputFormat::Pretty)]
    output_format: OutputFormat,
    log_level: Option<LogLevel>,
}

/// Runs a CLI command against the real terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = sensorlink::Args::try_parse_from([
///     "sensorlink",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|HRM-1|-40",
///     "--scan-window",
///     "200ms",
///     "scan",
/// ])?;
/// let context = sensorlink::RunContext::builder()
///     .store(Box::new(sensorlink::MemoryRecordStore::default()))
///     .config(args.link_config())
///     .filter(args.discovery_filter())
///     .maybe_log_level(args.log_level())
///     .backend(sensorlink::RadioBackend::from_fake_args(
///         args.into_command_and_fake_args()?.1,
///     ))
///     .build();
/// let mut out = Vec::new();
/// sensorlink::run(sensorlink::Command::Scan, &mut out, context).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the radio or session
/// record cannot be used, or output writing fails.
pub async fn run<W>(command: Command, out: &mut W, context: RunContext) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, context).await
}

/// Runs a CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the radio or session
/// record cannot be used, or output writing fails.
#[instrument(
    skip_all,
    level = "info",
    fields(command = %command_name(&command), output_format = ?context.output_format)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    context: RunContext,
) -> Result<()>
where
    W: io::Write,
{
    let RunContext {
        backend,
        store,
        config,
        filter,
        output_format,
        log_level,
    } = context;

    telemetry::initialise_tracing(
        "sensorlink",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Status => {
            crate::cli::status::run(store.as_ref(), out, terminal_client, output_format)
        }
        Command::Stopped(args) => crate::cli::status::set_stopped(
            store.as_ref(),
            &args,
            out,
            terminal_client,
            output_format,
        ),
        Command::Scan => {
            let scan_window = config.scan_window();
            let link = start_link(backend, store, config).await?;
            let outcome = crate::cli::scan::run(
                &link,
                filter,
                scan_window,
                out,
                terminal_client,
                output_format,
            )
            .await;
            link.shutdown().await?;
            outcome
        }
        Command::Listen(args) => {
            let scan_window = config.scan_window();
            let link = start_link(backend, store, config).await?;
            let outcome = crate::cli::listen::run(
                &link,
                &args,
                filter,
                scan_window,
                out,
                terminal_client,
                output_format,
            )
            .await;
            link.shutdown().await?;
            outcome
        }
    }
}

async fn start_link(
    backend: RadioBackend,
    store: Box<dyn SessionRecordStore>,
    config: LinkConfig,
) -> Result<SensorLinkHandle, LinkError> {
    let transport = backend.open().await?;
    debug!(?transport, "radio ready");
    Ok(SensorLink::spawn(config, transport, store))
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan => "scan",
        Command::Listen(_args) => "listen",
        Command::Status => "status",
        Command::Stopped(_args) => "stopped",
    }
}
