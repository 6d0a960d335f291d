//! Idempotent dispose protocol for application types.
//!
//! A [`Disposable`] is a tracked object with a three-state lifecycle:
//!
//! ```text
//! Active --dispose()--> Disposing --all cleanups settled--> Disposed
//! ```
//!
//! Cleanups can only be registered while `Active`. Registering from inside a
//! running cleanup is silently ignored, as is any `dispose` after the first.
//!
//! A cleanup must not capture the `Arc<Disposable>` it is registered on. That
//! makes the disposable reachable from its own cleanup set, so it is never
//! finalized and only an explicit `dispose` will run its cleanups.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;

use crate::completion::Completion;
use crate::disposer::{Disposer, Outcome};
use crate::engine::AutoDisposer;

/// Lifecycle of a [`Disposable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisposeState {
    Active,
    Disposing,
    Disposed,
}

impl DisposeState {
    pub fn is_terminal(self) -> bool {
        self == DisposeState::Disposed
    }

    fn accepts_cleanups(self) -> bool {
        self == DisposeState::Active
    }
}

/// Object with an explicit, idempotent `dispose`
///
/// # Examples
///
/// ```
/// use autodispose::{Disposable, Disposer};
///
/// let service = Disposable::new();
/// let handle = service.register_cleanup(Disposer::new(|| println!("closing socket")));
/// service.register_cleanup(Disposer::new(|| println!("flushing log")));
/// assert_eq!(service.pending_cleanups(), 2);
///
/// assert!(handle.unregister());
/// let _ = service.dispose();
/// assert!(service.is_disposed());
/// ```
pub struct Disposable {
    state: Mutex<DisposeState>,
    engine: AutoDisposer,
}

impl Disposable {
    /// A disposable registered with the process-wide engine
    pub fn new() -> Arc<Self> {
        Self::with_engine(AutoDisposer::global())
    }

    pub fn with_engine(engine: &AutoDisposer) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DisposeState::Active),
            engine: engine.clone(),
        })
    }

    pub fn state(&self) -> DisposeState {
        *self.state.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Register `disposer` to run when this object is disposed or finalized
    ///
    /// Outside the `Active` state the disposer is dropped and the returned
    /// handle does nothing.
    pub fn register_cleanup(self: &Arc<Self>, disposer: Disposer) -> CleanupHandle {
        let state = self.state.lock();
        if !state.accepts_cleanups() {
            tracing::trace!(state = ?*state, "ignoring cleanup registered after dispose");
            return CleanupHandle::inert();
        }
        self.engine.attach_unchecked(self, disposer.clone());
        drop(state);

        CleanupHandle {
            owner: Arc::downgrade(self),
            disposer: Some(disposer),
        }
    }

    /// Dispose `child` together with this object
    pub fn register_child(self: &Arc<Self>, child: &Arc<Disposable>) -> CleanupHandle {
        self.register_cleanup(Disposable::disposer_for(Arc::clone(child)))
    }

    /// Cleanups currently waiting to run
    pub fn pending_cleanups(self: &Arc<Self>) -> usize {
        self.engine.pending_count(self)
    }

    /// Run every registered cleanup
    ///
    /// Only the first call does anything. Later calls, including calls made
    /// while the first is still running, return an already-complete
    /// completion.
    pub fn dispose(self: &Arc<Self>) -> Completion {
        {
            let mut state = self.state.lock();
            if *state != DisposeState::Active {
                return Completion::ready();
            }
            *state = DisposeState::Disposing;
        }

        let completion = self.engine.dispose(self);
        if completion.is_complete() {
            self.finish();
            return Completion::ready();
        }

        let this = Arc::downgrade(self);
        Completion::from_future(async move {
            completion.await;
            if let Some(this) = this.upgrade() {
                this.finish();
            }
        })
    }

    fn finish(&self) {
        *self.state.lock() = DisposeState::Disposed;
        tracing::trace!("disposable reached its terminal state");
    }

    /// Disposer that disposes `disposable` and waits for it
    pub(crate) fn disposer_for(disposable: Arc<Disposable>) -> Disposer {
        Disposer::from_outcome(move || {
            let completion = disposable.dispose();
            if completion.is_complete() {
                Ok(Outcome::Done)
            } else {
                Ok(Outcome::Pending(completion.map(Ok).boxed()))
            }
        })
        .labeled("dispose")
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("state", &self.state())
            .finish()
    }
}

/// Returned by [`Disposable::register_cleanup`]
///
/// Dropping the handle leaves the cleanup registered.
#[derive(Debug)]
pub struct CleanupHandle {
    owner: Weak<Disposable>,
    disposer: Option<Disposer>,
}

impl CleanupHandle {
    fn inert() -> Self {
        Self {
            owner: Weak::new(),
            disposer: None,
        }
    }

    /// Whether the cleanup was actually registered
    pub fn is_registered(&self) -> bool {
        self.disposer.is_some()
    }

    /// Remove the cleanup without running it; false if it already ran or was
    /// never registered
    pub fn unregister(self) -> bool {
        match (self.owner.upgrade(), self.disposer) {
            (Some(owner), Some(disposer)) => owner.engine.detach_one(&owner, &disposer),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoDisposerConfig;
    use crate::finalization::mocks::MockFinalizationHost;
    use crate::sink::ErrorSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> AutoDisposer {
        AutoDisposer::with_config(
            AutoDisposerConfig::default()
                .with_host(MockFinalizationHost::new())
                .with_error_sink(ErrorSink::new(|_| {})),
        )
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Disposer {
        let counter = Arc::clone(counter);
        Disposer::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispose_is_idempotent() {
        let engine = engine();
        let runs = Arc::new(AtomicUsize::new(0));
        let disposable = Disposable::with_engine(&engine);
        disposable.register_cleanup(counting(&runs));

        assert_eq!(disposable.state(), DisposeState::Active);
        assert!(disposable.dispose().is_complete());
        assert!(disposable.is_disposed());
        assert!(disposable.dispose().is_complete());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_after_dispose_is_ignored() {
        let engine = engine();
        let runs = Arc::new(AtomicUsize::new(0));
        let disposable = Disposable::with_engine(&engine);
        let _ = disposable.dispose();

        let handle = disposable.register_cleanup(counting(&runs));
        assert!(!handle.is_registered());
        assert!(!handle.unregister());
        assert_eq!(disposable.pending_cleanups(), 0);
    }

    #[test]
    fn unregistered_cleanups_never_run() {
        let engine = engine();
        let runs = Arc::new(AtomicUsize::new(0));
        let disposable = Disposable::with_engine(&engine);
        let handle = disposable.register_cleanup(counting(&runs));

        assert!(handle.unregister());
        let _ = disposable.dispose();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn children_are_disposed_with_their_parent() {
        let engine = engine();
        let parent = Disposable::with_engine(&engine);
        let child = Disposable::with_engine(&engine);
        let runs = Arc::new(AtomicUsize::new(0));
        child.register_cleanup(counting(&runs));
        parent.register_child(&child);

        let _ = parent.dispose();
        assert!(child.is_disposed());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_is_disposing_while_async_cleanups_run() {
        let engine = engine();
        let disposable = Disposable::with_engine(&engine);
        let (release, released) = futures::channel::oneshot::channel::<()>();
        let released = Mutex::new(Some(released));
        disposable.register_cleanup(Disposer::from_outcome(move || {
            let waiter = released.lock().take();
            Ok(Outcome::pending(async move {
                if let Some(waiter) = waiter {
                    let _ = waiter.await;
                }
                Ok::<(), crate::error::BoxError>(())
            }))
        }));

        let completion = disposable.dispose();
        assert_eq!(disposable.state(), DisposeState::Disposing);
        assert!(disposable.dispose().is_complete());

        release.send(()).unwrap();
        futures::executor::block_on(completion);
        assert_eq!(disposable.state(), DisposeState::Disposed);
    }
}
