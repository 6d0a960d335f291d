//! Engine configuration.

use std::fmt;
use std::sync::Arc;

use crate::adapter::AdapterRegistry;
use crate::finalization::FinalizationHost;
use crate::sink::ErrorSink;

/// Configuration for an [`AutoDisposer`](crate::AutoDisposer)
///
/// Every field falls back to a process-wide default: a fresh
/// [`WeakRegistry`](crate::finalization::WeakRegistry) host, the global
/// [`AdapterRegistry`] and the global error sink.
///
/// # Examples
///
/// ```
/// use autodispose::{AutoDisposer, AutoDisposerConfig, ErrorSink};
/// use autodispose::finalization::WeakRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(WeakRegistry::new());
/// let engine = AutoDisposer::with_config(
///     AutoDisposerConfig::default()
///         .with_host(Arc::clone(&registry))
///         .with_error_sink(ErrorSink::tracing())
///         .with_batch_registrations(true),
/// );
/// assert_eq!(engine.stats().tracked_objects, 0);
/// ```
#[derive(Default, Clone)]
pub struct AutoDisposerConfig {
    pub host: Option<Arc<dyn FinalizationHost>>,
    pub adapters: Option<Arc<AdapterRegistry>>,
    /// Overrides the process-wide sink for this engine only
    pub error_sink: Option<ErrorSink>,
    /// Queue finalization registrations and forward them in batches
    pub batch_registrations: bool,
}

impl AutoDisposerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host<H: FinalizationHost + 'static>(mut self, host: H) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    pub fn with_adapters(mut self, adapters: Arc<AdapterRegistry>) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_batch_registrations(mut self, batch: bool) -> Self {
        self.batch_registrations = batch;
        self
    }
}

impl fmt::Debug for AutoDisposerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoDisposerConfig")
            .field("custom_host", &self.host.is_some())
            .field("adapters", &self.adapters)
            .field("error_sink", &self.error_sink)
            .field("batch_registrations", &self.batch_registrations)
            .finish()
    }
}
