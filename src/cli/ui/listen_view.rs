use std::fmt::{self, Display, Formatter};

use crate::cli::listen::{ListenStopReason, ListenSummary, TargetSource};
use crate::model::{PeripheralIdentity, SampleBatch, StateChange};
use crate::utils::format_values;

use super::painter::Painter;

/// Renders the peripheral a listen run is about to connect to.
pub(crate) struct ListenTargetView<'a> {
    identity: &'a PeripheralIdentity,
    source: TargetSource,
    painter: &'a Painter,
}

impl<'a> ListenTargetView<'a> {
    pub(crate) fn new(
        identity: &'a PeripheralIdentity,
        source: TargetSource,
        painter: &'a Painter,
    ) -> Self {
        Self {
            identity,
            source,
            painter,
        }
    }
}

impl Display for ListenTargetView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Target:"),
            self.painter.value(self.identity.display_label()),
            self.painter
                .muted(format!("({}, {})", self.identity.address(), self.source))
        )
    }
}

/// Renders one connection-state change.
pub(crate) struct StateLineView<'a> {
    change: &'a StateChange,
    painter: &'a Painter,
}

impl<'a> StateLineView<'a> {
    pub(crate) fn new(change: &'a StateChange, painter: &'a Painter) -> Self {
        Self { change, painter }
    }
}

impl Display for StateLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.muted("state"),
            self.painter.state(self.change.state())
        )?;
        if let Some(device) = self.change.device_name() {
            write!(f, " {}", self.painter.muted(device))?;
        }
        Ok(())
    }
}

/// Renders one accepted sample batch.
pub(crate) struct BatchLineView<'a> {
    index: usize,
    batch: &'a SampleBatch,
    painter: &'a Painter,
}

impl<'a> BatchLineView<'a> {
    pub(crate) fn new(index: usize, batch: &'a SampleBatch, painter: &'a Painter) -> Self {
        Self {
            index,
            batch,
            painter,
        }
    }
}

impl Display for BatchLineView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mean = self
            .batch
            .mean()
            .map_or_else(|| "-".to_string(), |mean| mean.to_string());
        write!(
            f,
            "{} {} {}",
            self.painter.muted(format!("[{:04}]", self.index)),
            self.painter.value(format!("mean={mean}")),
            self.painter
                .muted(format!("values={}", format_values(&self.batch.values())))
        )
    }
}

/// Renders the end-of-run summary.
pub(crate) struct ListenSummaryView<'a> {
    summary: &'a ListenSummary,
    painter: &'a Painter,
}

impl<'a> ListenSummaryView<'a> {
    pub(crate) fn new(summary: &'a ListenSummary, painter: &'a Painter) -> Self {
        Self { summary, painter }
    }
}

impl Display for ListenSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let reason = self.summary.stop_reason().to_string();
        let reason = match self.summary.stop_reason() {
            ListenStopReason::ReachedLimit => self.painter.success(reason),
            ListenStopReason::Interrupted | ListenStopReason::LinkClosed => {
                self.painter.warning(reason)
            }
        };
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Stopped:"),
            reason,
            self.painter
                .value(format!("- received {} batch(es)", self.summary.batches()))
        )?;
        if let Some(path) = self.summary.export_path() {
            write!(
                f,
                "\n{} {}",
                self.painter.heading("Exported:"),
                self.painter.value(path.display().to_string())
            )?;
        }
        Ok(())
    }
}
