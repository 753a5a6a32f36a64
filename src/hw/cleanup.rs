use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tracing::{debug, warn};

type CleanupFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs an async cleanup step unless disarmed.
///
/// A radio future abandoned on timeout or cancellation drops its guards; the
/// cleanup then runs on a background task of the current runtime.
pub(crate) struct CleanupGuard {
    label: &'static str,
    cleanup: Option<CleanupFuture>,
}

impl CleanupGuard {
    pub(crate) fn new(
        label: &'static str,
        cleanup: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        Self {
            label,
            cleanup: Some(Box::pin(cleanup)),
        }
    }

    /// Runs the cleanup in place.
    pub(crate) async fn run(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.await;
        }
    }

    /// Keeps the resource; the cleanup never runs.
    pub(crate) fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl fmt::Debug for CleanupGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("label", &self.label)
            .field("armed", &self.cleanup.is_some())
            .finish()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                debug!(label = self.label, "running cleanup for an abandoned operation");
                drop(runtime.spawn(cleanup));
            }
            Err(_no_runtime) => warn!(label = self.label, "no runtime left to run cleanup"),
        }
    }
}
