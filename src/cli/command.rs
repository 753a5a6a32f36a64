use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::cli::listen::ListenArgs;
use crate::cli::status::StoppedArgs;
use crate::config::LinkConfig;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, FakeFailure, NotificationPayloads, ScanFixture};
use crate::record::FileRecordStore;
use crate::registry::DiscoveryFilter;

/// Command-line options for the BLE sensor link.
#[derive(Debug, Parser)]
#[command(
    name = "sensorlink",
    about = "Discover, connect to, and stream samples from a BLE sensor."
)]
pub struct Args {
    /// Overrides `RUST_LOG` for diagnostics written to stderr.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format for stdout. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Session record file. Defaults to the platform state directory.
    #[arg(long, global = true, value_name = "FILE")]
    record_path: Option<PathBuf>,
    /// Upper bound on establishing a link (e.g. `5s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Length of one discovery scan (e.g. `1s`, `500ms`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_window: Option<Duration>,
    /// Only report peripherals whose advertised name starts with this prefix.
    #[arg(long, global = true)]
    name_prefix: Option<String>,
    /// Uses the fake radio with fixture-driven discovery and notifications.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `address|name|rssi;...` (`-` for a missing name or RSSI).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake notification payloads as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Failure injected by the fake radio (`connect`, `discovery`, `notify`, `drop`).
    #[arg(long, global = true, requires = "fake", value_parser = FakeFailure::parse)]
    fake_fail: Option<FakeFailure>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use sensorlink::{Args, Command, ListenArgs};
    ///
    /// let scan = Args::new(Command::Scan);
    /// let listen = Args::new(Command::Listen(ListenArgs::new(Some(3))));
    /// let _ = (scan, listen);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output_format: None,
            record_path: None,
            connect_timeout: None,
            scan_window: None,
            name_prefix: None,
            fake: false,
            fake_scan: None,
            fake_notifications: None,
            fake_fail: None,
            command,
        }
    }

    /// Enables fake radio mode with pre-parsed fixtures.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            notifications,
            failure,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_notifications = notifications;
        self.fake_fail = failure;
        self
    }

    /// Uses an explicit session record file.
    #[must_use]
    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = Some(path.into());
        self
    }

    /// Returns the explicit log level, if one was given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the explicit output format, if one was given.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    /// Builds the link tunables, applying any timing overrides.
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        let defaults = LinkConfig::default();
        LinkConfig::builder()
            .scan_window(self.scan_window.unwrap_or(defaults.scan_window()))
            .connect_timeout(self.connect_timeout.unwrap_or(defaults.connect_timeout()))
            .build()
    }

    /// Returns the discovery filter for scans started by this run.
    #[must_use]
    pub fn discovery_filter(&self) -> DiscoveryFilter {
        self.name_prefix
            .as_deref()
            .map_or_else(DiscoveryFilter::any, DiscoveryFilter::name_prefix)
    }

    /// Returns the session record store for this run.
    #[must_use]
    pub fn record_store(&self) -> FileRecordStore {
        FileRecordStore::at_default_or(self.record_path.clone())
    }

    /// Splits parsed CLI arguments into command and optional fake-radio settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the fake radio configuration is incomplete.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_notifications,
            fake_fail,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                notifications: fake_notifications,
                failure: fake_fail,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake radio arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    failure: Option<FakeFailure>,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            notifications,
            failure,
        } = self;

        FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .maybe_notifications(notifications)
            .maybe_failure(failure)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one discovery scan and print the peripherals found.
    Scan,
    /// Connect to a sensor and stream sample batches.
    Listen(ListenArgs),
    /// Print the persisted session record.
    Status,
    /// Set whether incoming sample batches are discarded.
    Stopped(StoppedArgs),
}

/// Diagnostic verbosity for stderr logging.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command output on stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables and lines.
    Pretty,
    /// One JSON document per line.
    Json,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["sensorlink", "--fake", "scan"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from(["sensorlink", "--fake-fail", "drop", "scan"]);

        let error = result.expect_err("fake fixture flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn unknown_failure_mode_is_rejected() {
        let result = Args::try_parse_from([
            "sensorlink",
            "--fake",
            "--fake-scan",
            "AA:BB|HRM-1|-40",
            "--fake-fail",
            "explode",
            "scan",
        ]);

        let error = result.expect_err("unknown failure modes should not parse");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "sensorlink",
            "--fake",
            "--fake-scan",
            "AA:BB|HRM-1|-40",
            "listen",
            "--max-batches",
            "2",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Listen(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn timing_flags_override_link_defaults() {
        let cli = Args::try_parse_from([
            "sensorlink",
            "--scan-window",
            "250ms",
            "--connect-timeout",
            "3s",
            "status",
        ])
        .expect("timing flags should parse");

        let config = cli.link_config();
        assert_eq!(Duration::from_millis(250), config.scan_window());
        assert_eq!(Duration::from_secs(3), config.connect_timeout());
        assert_eq!(
            LinkConfig::default().discovery_timeout(),
            config.discovery_timeout()
        );
    }

    #[test]
    fn name_prefix_builds_filter() {
        let cli = Args::try_parse_from(["sensorlink", "--name-prefix", "HRM", "scan"])
            .expect("name prefix should parse");
        assert_eq!(DiscoveryFilter::name_prefix("HRM"), cli.discovery_filter());
    }

    #[test]
    fn log_level_maps_to_filter() {
        let cli = Args::try_parse_from(["sensorlink", "--log-level", "debug", "status"])
            .expect("log level should parse");
        assert_eq!(
            Some(LevelFilter::DEBUG),
            cli.log_level().map(LogLevel::as_level_filter)
        );
    }
}
