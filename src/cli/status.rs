use std::io;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::{info, instrument};

use crate::record::{SessionRecord, SessionRecordStore};
use crate::terminal::TerminalClient;

use super::OutputFormat;
use super::ui::{Painter, SessionRecordView};

/// Arguments for the `stopped` command.
#[derive(Debug, Args)]
pub struct StoppedArgs {
    /// `on` discards incoming batches, `off` accepts them again.
    #[arg(value_enum)]
    state: Toggle,
}

impl StoppedArgs {
    /// Creates arguments that turn the stopped flag on or off.
    #[must_use]
    pub fn new(stopped: bool) -> Self {
        let state = if stopped { Toggle::On } else { Toggle::Off };
        Self { state }
    }

    fn stopped(&self) -> bool {
        self.state == Toggle::On
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// Executes the `status` command.
pub(crate) fn run<W>(
    store: &dyn SessionRecordStore,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let record = store.load()?;
    print_record(&record, out, terminal_client, output_format)
}

/// Executes the `stopped` command.
#[instrument(skip_all, level = "debug", fields(stopped = args.stopped()))]
pub(crate) fn set_stopped<W>(
    store: &dyn SessionRecordStore,
    args: &StoppedArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let record = store.load()?.with_stopped(args.stopped());
    store.save(&record)?;
    info!("updated stopped flag");
    print_record(&record, out, terminal_client, output_format)
}

fn print_record<W>(
    record: &SessionRecord,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", SessionRecordView::new(record, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, record)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
