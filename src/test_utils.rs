//! Test utilities for autodispose tests
//!
//! This module provides an isolated engine fixture plus disposers and error
//! sinks that record what happened to them, so tests never touch the
//! process-wide engine, adapter registry or error sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::AdapterRegistry;
use crate::config::AutoDisposerConfig;
use crate::disposer::{Disposer, Outcome};
use crate::engine::AutoDisposer;
use crate::error::BoxError;
use crate::finalization::{SweepReport, WeakRegistry};
use crate::sink::ErrorSink;

/// Error sink that keeps every report
///
/// Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink feeding this recorder
    pub fn sink(&self) -> ErrorSink {
        let messages = Arc::clone(&self.messages);
        ErrorSink::new(move |err| messages.lock().push(err.to_string()))
    }

    pub fn count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

/// Standard test fixture: an engine with its own host, adapters and sink
///
/// # Examples
///
/// ```
/// use autodispose::test_utils::{counting_disposer, TestFixture};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let fixture = TestFixture::new();
/// let runs = Arc::new(AtomicUsize::new(0));
///
/// let object = Arc::new(vec![1, 2, 3]);
/// fixture.engine.attach(&object, counting_disposer(&runs)).unwrap();
/// drop(object);
///
/// assert_eq!(fixture.collect().finalized, 1);
/// assert_eq!(runs.load(Ordering::SeqCst), 1);
/// ```
pub struct TestFixture {
    pub engine: AutoDisposer,
    pub registry: Arc<WeakRegistry>,
    pub adapters: Arc<AdapterRegistry>,
    pub sink: RecordingSink,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Fixture whose finalization registrations are batched
    pub fn batched() -> Self {
        Self::build(true)
    }

    fn build(batch_registrations: bool) -> Self {
        let registry = Arc::new(WeakRegistry::new());
        let adapters = Arc::new(AdapterRegistry::new());
        let sink = RecordingSink::new();
        let engine = AutoDisposer::with_config(
            AutoDisposerConfig::default()
                .with_host(Arc::clone(&registry))
                .with_adapters(Arc::clone(&adapters))
                .with_error_sink(sink.sink())
                .with_batch_registrations(batch_registrations),
        );

        Self {
            engine,
            registry,
            adapters,
            sink,
        }
    }

    /// Finalize every tracked object that has been dropped
    pub fn collect(&self) -> SweepReport {
        self.engine.collect()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience macro for creating a test fixture
#[macro_export]
macro_rules! test_fixture {
    () => {
        $crate::test_utils::TestFixture::new()
    };
    (batched) => {
        $crate::test_utils::TestFixture::batched()
    };
}

/// Disposer that increments `counter` each time it runs
pub fn counting_disposer(counter: &Arc<AtomicUsize>) -> Disposer {
    let counter = Arc::clone(counter);
    Disposer::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Disposer that appends `name` to `log` and carries it as its label
pub fn recording_disposer(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Disposer {
    let log = Arc::clone(log);
    Disposer::new(move || log.lock().push(name)).labeled(name)
}

/// Disposer that fails synchronously with `message`
pub fn failing_disposer(message: &'static str) -> Disposer {
    Disposer::fallible(move || Err(message))
}

/// Disposer whose asynchronous part fails with `message`
pub fn rejecting_disposer(message: &'static str) -> Disposer {
    Disposer::from_outcome(move || {
        Ok(Outcome::pending(async move { Err::<(), BoxError>(message.into()) }))
    })
}
