use std::io;
use std::time::Duration;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tracing::{instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::link::SensorLinkHandle;
use crate::model::Advertisement;
use crate::registry::DiscoveryFilter;
use crate::state::ConnectionState;
use crate::terminal::TerminalClient;

use super::OutputFormat;
use super::ui::{DiscoveredView, Painter};

/// Slack on top of the scan window before the CLI stops waiting for the link.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Executes the `scan` command.
pub(crate) async fn run<W>(
    link: &SensorLinkHandle,
    filter: DiscoveryFilter,
    scan_window: Duration,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let discovered = discover(link, filter, scan_window).await?;
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", DiscoveredView::new(&discovered, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &discovered)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Runs one scan window and returns what it found, in discovery order.
#[instrument(skip(link), level = "info")]
pub(crate) async fn discover(
    link: &SensorLinkHandle,
    filter: DiscoveryFilter,
    scan_window: Duration,
) -> Result<Vec<Advertisement>> {
    let span = tracing::Span::current();
    span.pb_set_message("Scanning for sensors");

    let mut states = link.subscribe_state();
    link.start_scanning(filter)?;

    let window_closed = async {
        while let Some(change) = states.next().await {
            if change.state() == ConnectionState::Disconnected {
                break;
            }
        }
    };
    if timeout(scan_window + SCAN_GRACE, window_closed).await.is_err() {
        warn!("scan did not finish within its window; stopping it");
        link.stop_scanning()?;
    }

    let discovered = link.discovered().borrow().clone();
    span.pb_set_finish_message(&format!(
        "{} Found {} sensor(s)",
        "✓".green(),
        discovered.len()
    ));
    Ok(discovered)
}
