//! Process-wide error sink for disposer failures.
//!
//! Cleanup failures never propagate to the caller of `dispose`. Every one of
//! them is handed to an [`ErrorSink`] instead: the engine's own sink when one
//! was configured, otherwise the process-wide sink installed with
//! [`set_error_sink`]. The default process-wide sink emits a `tracing` error
//! event.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;

use crate::error::DisposeError;

/// Receiver for failures raised by disposers
#[derive(Clone)]
pub struct ErrorSink {
    handler: Arc<dyn Fn(&DisposeError) + Send + Sync>,
}

impl ErrorSink {
    /// Create a sink from a handler closure
    ///
    /// # Examples
    ///
    /// ```
    /// use autodispose::ErrorSink;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    ///
    /// let seen = Arc::new(AtomicUsize::new(0));
    /// let counter = Arc::clone(&seen);
    /// let sink = ErrorSink::new(move |_err| {
    ///     counter.fetch_add(1, Ordering::Relaxed);
    /// });
    /// # let _ = sink;
    /// ```
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&DisposeError) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// The default sink: report through `tracing` at error level
    pub fn tracing() -> Self {
        Self::new(|err| {
            tracing::error!(error = %err, label = err.label(), "uncaught disposer failure");
        })
    }

    /// Deliver `err` to the handler
    ///
    /// A panicking handler is contained so that the remaining disposers of the
    /// same dispose call still run.
    pub fn report(&self, err: &DisposeError) {
        if catch_unwind(AssertUnwindSafe(|| (self.handler)(err))).is_err() {
            tracing::error!(error = %err, "error sink panicked while reporting disposer failure");
        }
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

static GLOBAL_SINK: Lazy<ArcSwap<ErrorSink>> =
    Lazy::new(|| ArcSwap::from_pointee(ErrorSink::tracing()));

/// Install the process-wide error sink
///
/// Applications should do this once at startup. Engines configured with their
/// own sink are unaffected.
pub fn set_error_sink(sink: ErrorSink) {
    GLOBAL_SINK.store(Arc::new(sink));
}

/// Restore the default `tracing` sink
pub fn reset_error_sink() {
    GLOBAL_SINK.store(Arc::new(ErrorSink::tracing()));
}

/// The currently installed process-wide sink
pub fn global_error_sink() -> ErrorSink {
    ErrorSink::clone(&GLOBAL_SINK.load())
}

/// Route `err` to `preferred` if set, otherwise to the process-wide sink
pub(crate) fn report(preferred: Option<&ErrorSink>, err: &DisposeError) {
    match preferred {
        Some(sink) => sink.report(err),
        None => GLOBAL_SINK.load().report(err),
    }
}
