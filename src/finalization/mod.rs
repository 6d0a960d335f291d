//! Host finalization facility
//!
//! The engine never decides on its own that an object is unreachable. It
//! registers a [`Finalizer`] with a [`FinalizationHost`] and the host runs the
//! finalizer some time after the target's last strong reference is gone.
//!
//! ## Components
//!
//! - **FinalizationHost**: the injected capability (`register` / `cancel`)
//! - **WeakRegistry**: default host; detects dead targets on [`sweep`](FinalizationHost::sweep)
//! - **DeferredHost**: batches registrations and forwards them on flush
//!
//! A finalizer holds the object's disposer set, never the object itself.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::completion::Completion;
use crate::disposer;
use crate::engine::Shared;
use crate::store::DisposerSet;

pub mod deferred;
pub mod weak_registry;

#[cfg(test)]
pub(crate) mod mocks;

pub use deferred::DeferredHost;
pub use weak_registry::{WeakRegistry, WeakRegistryStats};

/// Weak handle to a tracked object, as handed to a host
pub type WeakTarget = Weak<dyn Any + Send + Sync>;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handle for one live registration with a [`FinalizationHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FinalizationToken(u64);

impl FinalizationToken {
    /// Allocate a process-unique token
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The held value of a registration: an object's disposer set plus the way
/// back into the engine that owns it
pub struct Finalizer {
    set: Arc<DisposerSet>,
    engine: Weak<Shared>,
}

impl Finalizer {
    pub(crate) fn new(set: Arc<DisposerSet>, engine: Weak<Shared>) -> Self {
        Self { set, engine }
    }

    /// Number of disposers this finalizer would run right now
    pub fn pending(&self) -> usize {
        self.set.len()
    }

    /// Run the captured disposers
    ///
    /// Hosts call this once the target is unreachable. Disposers already run
    /// or detached through the manual path are not run again.
    pub fn run(self) -> Completion {
        match self.engine.upgrade() {
            Some(engine) => engine.finalize(&self.set),
            None => disposer::run_all(self.set.take(), None),
        }
    }
}

impl fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer")
            .field("set", &self.set)
            .field("engine_alive", &(self.engine.strong_count() > 0))
            .finish()
    }
}

/// Result of one [`FinalizationHost::sweep`]
#[must_use = "asynchronous disposers may only run once `completion` is awaited"]
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Finalizers run during the sweep
    pub finalized: usize,
    /// Completes when their asynchronous disposers have settled
    pub completion: Completion,
}

/// Unreachability notification capability
///
/// `register` must not keep `target` alive. After `cancel` returns the
/// finalizer must never run. Implementations decide when finalizers run;
/// `sweep` lets callers ask for it.
pub trait FinalizationHost: Send + Sync {
    /// Arrange for `finalizer` to run once `target` is unreachable
    fn register(&self, target: WeakTarget, finalizer: Finalizer) -> FinalizationToken;

    /// Suppress a registration; returns false if it was unknown or already ran
    fn cancel(&self, token: FinalizationToken) -> bool;

    /// Whether `token` is still registered and waiting
    fn contains(&self, token: FinalizationToken) -> bool;

    /// Number of live registrations
    fn live(&self) -> usize;

    /// Run finalizers for targets found unreachable
    fn sweep(&self) -> SweepReport {
        SweepReport::default()
    }

    /// Forward any batched registrations; returns how many were forwarded
    fn flush(&self) -> usize {
        0
    }
}

impl<H: FinalizationHost + ?Sized> FinalizationHost for Arc<H> {
    fn register(&self, target: WeakTarget, finalizer: Finalizer) -> FinalizationToken {
        (**self).register(target, finalizer)
    }

    fn cancel(&self, token: FinalizationToken) -> bool {
        (**self).cancel(token)
    }

    fn contains(&self, token: FinalizationToken) -> bool {
        (**self).contains(token)
    }

    fn live(&self) -> usize {
        (**self).live()
    }

    fn sweep(&self) -> SweepReport {
        (**self).sweep()
    }

    fn flush(&self) -> usize {
        (**self).flush()
    }
}
