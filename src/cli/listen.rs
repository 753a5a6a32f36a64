use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_with::SerializeDisplay;
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{ExportError, SensorLinkError};
use crate::export::export_session;
use crate::link::SensorLinkHandle;
use crate::model::{PeripheralIdentity, SampleBatch, SessionId, StateChange};
use crate::registry::DiscoveryFilter;
use crate::state::ConnectionState;
use crate::terminal::TerminalClient;

use super::OutputFormat;
use super::scan;
use super::ui::{BatchLineView, ListenSummaryView, ListenTargetView, Painter, StateLineView};

/// Arguments for the `listen` command.
#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Peripheral address. Defaults to the saved peripheral, then the first one discovered.
    #[arg(long)]
    address: Option<String>,
    /// Stop after this many sample batches. If omitted, listen until the link closes or Ctrl+C.
    #[arg(long)]
    max_batches: Option<usize>,
    /// Export the session samples to this file, or into this directory, when listening ends.
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,
}

impl ListenArgs {
    /// Creates listen arguments with an optional batch limit.
    #[must_use]
    pub fn new(max_batches: Option<usize>) -> Self {
        Self {
            address: None,
            max_batches,
            export: None,
        }
    }

    /// Connects to an explicit address instead of the saved or discovered peripheral.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Exports the session samples when listening ends.
    #[must_use]
    pub fn with_export(mut self, target: impl Into<PathBuf>) -> Self {
        self.export = Some(target.into());
        self
    }
}

/// How the listen target was chosen.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub(crate) enum TargetSource {
    #[display("requested address")]
    Requested,
    #[display("saved peripheral")]
    Saved,
    #[display("first discovered")]
    Discovered,
}

/// Why a listen run ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display, SerializeDisplay)]
pub(crate) enum ListenStopReason {
    #[display("reached batch limit")]
    ReachedLimit,
    #[display("interrupted by user")]
    Interrupted,
    #[display("link closed")]
    LinkClosed,
}

/// Outcome of a listen run.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListenSummary {
    device: PeripheralIdentity,
    batches: usize,
    stop_reason: ListenStopReason,
    export_path: Option<PathBuf>,
}

impl ListenSummary {
    pub(crate) fn new(
        device: PeripheralIdentity,
        batches: usize,
        stop_reason: ListenStopReason,
        export_path: Option<PathBuf>,
    ) -> Self {
        Self {
            device,
            batches,
            stop_reason,
            export_path,
        }
    }

    pub(crate) fn batches(&self) -> usize {
        self.batches
    }

    pub(crate) fn stop_reason(&self) -> ListenStopReason {
        self.stop_reason
    }

    pub(crate) fn export_path(&self) -> Option<&Path> {
        self.export_path.as_deref()
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ListenLine<'a> {
    Target {
        device: &'a PeripheralIdentity,
        source: TargetSource,
    },
    State {
        state: ConnectionState,
        device_name: Option<&'a str>,
    },
    Samples {
        index: usize,
        session_id: SessionId,
        values: Vec<u16>,
        mean: Option<u16>,
    },
    Summary(&'a ListenSummary),
}

struct ListenPrinter<'a, W> {
    out: &'a mut W,
    painter: Painter,
    output_format: OutputFormat,
}

impl<W: io::Write> ListenPrinter<'_, W> {
    fn target(&mut self, device: &PeripheralIdentity, source: TargetSource) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    ListenTargetView::new(device, source, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&ListenLine::Target { device, source }),
        }
    }

    fn state(&mut self, change: &StateChange) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(self.out, "{}", StateLineView::new(change, &self.painter))?;
                Ok(())
            }
            OutputFormat::Json => self.json(&ListenLine::State {
                state: change.state(),
                device_name: change.device_name(),
            }),
        }
    }

    fn batch(&mut self, index: usize, batch: &SampleBatch) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(
                    self.out,
                    "{}",
                    BatchLineView::new(index, batch, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&ListenLine::Samples {
                index,
                session_id: batch.session_id(),
                values: batch.values(),
                mean: batch.mean(),
            }),
        }
    }

    fn summary(&mut self, summary: &ListenSummary) -> Result<()> {
        match self.output_format {
            OutputFormat::Pretty => {
                writeln!(self.out)?;
                writeln!(
                    self.out,
                    "{}",
                    ListenSummaryView::new(summary, &self.painter)
                )?;
                Ok(())
            }
            OutputFormat::Json => self.json(&ListenLine::Summary(summary)),
        }
    }

    fn json(&mut self, line: &ListenLine<'_>) -> Result<()> {
        serde_json::to_writer(&mut *self.out, line)?;
        writeln!(self.out)?;
        Ok(())
    }
}

/// Executes the `listen` command against a running link.
pub(crate) async fn run<W>(
    link: &SensorLinkHandle,
    args: &ListenArgs,
    filter: DiscoveryFilter,
    scan_window: Duration,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let mut printer = ListenPrinter {
        out,
        painter: Painter::new(terminal_client.stdout_is_terminal()),
        output_format,
    };

    let (device, source) = choose_target(link, args, filter, scan_window).await?;
    printer.target(&device, source)?;

    let (batches, stop_reason) = stream_batches(link, &device, args.max_batches, &mut printer).await?;
    link.disconnect()?;

    let export_path = match &args.export {
        Some(target) => export_if_any(link, target).await?,
        None => None,
    };

    let summary = ListenSummary::new(device, batches, stop_reason, export_path);
    printer.summary(&summary)
}

async fn choose_target(
    link: &SensorLinkHandle,
    args: &ListenArgs,
    filter: DiscoveryFilter,
    scan_window: Duration,
) -> Result<(PeripheralIdentity, TargetSource)> {
    if let Some(address) = &args.address {
        return Ok((
            PeripheralIdentity::new(address.clone(), None),
            TargetSource::Requested,
        ));
    }
    if let Some(identity) = link.saved_record().await?.saved_identity() {
        return Ok((identity, TargetSource::Saved));
    }

    let discovered = scan::discover(link, filter, scan_window).await?;
    discovered
        .into_iter()
        .next()
        .map(|advertisement| (advertisement.into_identity(), TargetSource::Discovered))
        .context("no sensor was discovered and no peripheral is saved")
}

#[instrument(
    skip_all,
    level = "info",
    fields(address = device.address(), max_batches = ?max_batches)
)]
async fn stream_batches<W>(
    link: &SensorLinkHandle,
    device: &PeripheralIdentity,
    max_batches: Option<usize>,
    printer: &mut ListenPrinter<'_, W>,
) -> Result<(usize, ListenStopReason)>
where
    W: io::Write,
{
    let span = tracing::Span::current();
    span.pb_set_message(&format!("Listening to {}", device.display_label()));

    let mut subscription = link.subscribe();
    link.connect(device.clone())?;

    let mut batches = 0usize;
    let stop_reason = loop {
        if max_batches.is_some_and(|max| batches >= max) {
            break ListenStopReason::ReachedLimit;
        }
        tokio::select! {
            biased;
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                break ListenStopReason::Interrupted;
            }
            Some(batch) = subscription.samples.next() => {
                batches += 1;
                printer.batch(batches, &batch)?;
            }
            Some(change) = subscription.states.next() => {
                printer.state(&change)?;
                if change.state() == ConnectionState::Disconnected {
                    break ListenStopReason::LinkClosed;
                }
            }
            else => break ListenStopReason::LinkClosed,
        }
    };

    info!(batches, %stop_reason, "listen finished");
    span.pb_set_finish_message(&format!("{} Listened to {}", "✓".green(), device.display_label()));
    Ok((batches, stop_reason))
}

async fn export_if_any(link: &SensorLinkHandle, target: &Path) -> Result<Option<PathBuf>> {
    match export_session(link, target).await {
        Ok(path) => Ok(Some(path)),
        Err(SensorLinkError::Export(error)) if matches!(*error, ExportError::NoSamples) => {
            warn!("no samples were accepted; skipping export");
            Ok(None)
        }
        Err(error) => Err(error.into()),
    }
}
