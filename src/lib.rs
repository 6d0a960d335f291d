//! Attach cleanup actions to objects and run them exactly once.
//!
//! A disposer attached to an `Arc`-held object runs either when the object is
//! disposed explicitly or after it has become unreachable, whichever happens
//! first. The engine only keeps weak references to tracked objects.
//!
//! ```
//! use autodispose::{AutoDisposer, Disposer};
//! use std::sync::Arc;
//!
//! struct Session { id: u64 }
//!
//! let engine = AutoDisposer::new();
//! let session = Arc::new(Session { id: 1 });
//! engine.attach(&session, Disposer::new(|| println!("session closed")))?;
//!
//! // Either dispose explicitly...
//! let _ = engine.dispose(&session);
//! // ...or drop it and let a sweep find it.
//! drop(session);
//! let report = engine.collect();
//! futures::executor::block_on(report.completion);
//! # Ok::<(), autodispose::DisposeError>(())
//! ```

pub mod adapter;
pub mod completion;
pub mod config;
pub mod disposable;
pub mod disposer;
pub mod engine;
pub mod error;
pub mod finalization;
pub mod guard;
pub mod sink;
mod store;
pub mod test_utils;

use std::any::Any;
use std::sync::Arc;

pub use adapter::{
    clear_adapters, register_adapter, resolve, resolve_builtin, unregister_adapters, Adapter,
    AdapterRegistry, AnyObject, BuiltinKind, Close, CloseStream, Dispose, Subscription, Timer,
};
pub use completion::Completion;
pub use config::AutoDisposerConfig;
pub use disposable::{CleanupHandle, Disposable, DisposeState};
pub use disposer::{Disposer, DisposerId, Outcome};
pub use engine::{AutoDisposer, EngineStats};
pub use error::{BoxError, DisposeError, DisposeResult};
pub use finalization::{FinalizationHost, FinalizationToken, Finalizer, SweepReport};
pub use guard::{is_trackable, is_trackable_dyn};
pub use sink::{global_error_sink, reset_error_sink, set_error_sink, ErrorSink};

/// Attach `disposer` to `object` on the process-wide engine
pub fn attach<T>(object: &Arc<T>, disposer: impl Into<Option<Disposer>>) -> DisposeResult<()>
where
    T: Any + Send + Sync,
{
    AutoDisposer::global().attach(object, disposer)
}

pub fn attach_many<T, I>(object: &Arc<T>, disposers: I) -> DisposeResult<()>
where
    T: Any + Send + Sync,
    I: IntoIterator<Item = Disposer>,
{
    AutoDisposer::global().attach_many(object, disposers)
}

/// Dispose `object` on the process-wide engine
pub fn dispose<T: ?Sized>(object: &Arc<T>) -> Completion {
    AutoDisposer::global().dispose(object)
}

pub fn detach<T: ?Sized>(object: &Arc<T>) -> bool {
    AutoDisposer::global().detach(object)
}

pub fn detach_one<T: ?Sized>(object: &Arc<T>, disposer: &Disposer) -> bool {
    AutoDisposer::global().detach_one(object, disposer)
}

pub fn has_pending<T: ?Sized>(object: &Arc<T>) -> bool {
    AutoDisposer::global().has_pending(object)
}

pub fn pending_count<T: ?Sized>(object: &Arc<T>) -> usize {
    AutoDisposer::global().pending_count(object)
}

/// Finalize unreachable objects tracked by the process-wide engine
pub fn collect() -> SweepReport {
    AutoDisposer::global().collect()
}
