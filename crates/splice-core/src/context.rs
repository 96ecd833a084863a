//! Per-job execution context.
//!
//! One `JobContext` is created for each export job and threaded through
//! every stage. It carries the job's cancellation token, its debug switch,
//! and the sink for advisory diagnostics, so concurrent jobs never share
//! mutable state.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{SpliceError, SpliceResult};

/// Receiver for advisory `debug` messages.
pub type DiagnosticSink = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Clone)]
pub struct JobContext {
    id: String,
    cancel: CancellationToken,
    debug: bool,
    diagnostics: Option<DiagnosticSink>,
}

impl JobContext {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            debug: false,
            diagnostics: None,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation checkpoint.
    pub fn check_cancelled(&self) -> SpliceResult<()> {
        if self.is_cancelled() {
            Err(SpliceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Emit an advisory diagnostic; always logged, forwarded when a sink is set.
    pub fn diagnostic(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job = %self.id, "{}", message);
        if let Some(sink) = &self.diagnostics {
            sink(message);
        }
    }

    /// Like [`diagnostic`](Self::diagnostic) but only when debug is enabled.
    /// The message is built lazily.
    pub fn verbose<F: FnOnce() -> String>(&self, message: F) {
        if self.debug {
            self.diagnostic(message());
        }
    }
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("debug", &self.debug)
            .finish()
    }
}
