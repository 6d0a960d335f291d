//! Disposer store and dispose engine
//!
//! [`AutoDisposer`] keeps, per tracked object, an insertion-ordered set of
//! pending disposers and at most one live finalization registration. Disposers
//! run exactly once: through [`dispose`](AutoDisposer::dispose), or through
//! the host's finalizer once the object is unreachable, whichever comes first.
//! [`detach`](AutoDisposer::detach) cancels both paths.
//!
//! ## Components
//!
//! - **Shared**: store state shared by engine clones and finalizers
//! - **AutoDisposer**: the public handle
//! - **EngineStats**: counters reported by [`AutoDisposer::stats`]

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::channel::oneshot;
use once_cell::sync::Lazy;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::adapter::AdapterRegistry;
use crate::completion::Completion;
use crate::config::AutoDisposerConfig;
use crate::disposer::{self, Disposer};
use crate::error::DisposeResult;
use crate::finalization::{
    DeferredHost, FinalizationHost, Finalizer, SweepReport, WeakRegistry, WeakTarget,
};
use crate::guard;
use crate::sink::{self, ErrorSink};
use crate::store::{object_key, DisposerSet, Entry, ObjectKey};

/// A dispose call whose asynchronous disposers may still be running
struct InFlight {
    target: WeakTarget,
    /// The drained set of the entry being disposed; identifies the call
    set: Arc<DisposerSet>,
    completion: Completion,
}

pub(crate) struct Shared {
    entries: DashMap<ObjectKey, Entry>,
    in_flight: DashMap<ObjectKey, InFlight>,
    host: Arc<dyn FinalizationHost>,
    adapters: Arc<AdapterRegistry>,
    sink: ErrorSink,
    disposals: AtomicUsize,
    finalizations: AtomicUsize,
    failures: Arc<AtomicUsize>,
}

impl Shared {
    fn new(config: AutoDisposerConfig) -> Self {
        let host = config
            .host
            .unwrap_or_else(|| Arc::new(WeakRegistry::new()) as Arc<dyn FinalizationHost>);
        let host: Arc<dyn FinalizationHost> = if config.batch_registrations {
            Arc::new(DeferredHost::new(host))
        } else {
            host
        };

        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let preferred = config.error_sink;
        let sink = ErrorSink::new(move |err| {
            counter.fetch_add(1, Ordering::Relaxed);
            sink::report(preferred.as_ref(), err);
        });

        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            host,
            adapters: config.adapters.unwrap_or_else(AdapterRegistry::global),
            sink,
            disposals: AtomicUsize::new(0),
            finalizations: AtomicUsize::new(0),
            failures,
        }
    }

    fn insert<T: Any + Send + Sync>(self: &Arc<Self>, object: &Arc<T>, disposers: Vec<Disposer>) {
        if disposers.is_empty() {
            return;
        }

        let key = object_key(object);
        let mut entry = self.entries.entry(key).or_insert_with(|| Entry::new(object));

        let mut added = 0usize;
        for disposer in disposers {
            if entry.set.insert(disposer) {
                added += 1;
            }
        }

        if entry.token.is_none() {
            let finalizer = Finalizer::new(Arc::clone(&entry.set), Arc::downgrade(self));
            let token = self.host.register(entry.target.clone(), finalizer);
            entry.token = Some(token);
        }

        tracing::trace!(
            object = key,
            added,
            pending = entry.set.len(),
            "attached disposers"
        );
    }

    fn dispose(self: &Arc<Self>, key: ObjectKey) -> Completion {
        let (sender, receiver) = oneshot::channel::<Completion>();

        // The in-flight marker goes in before the entry comes out, so a
        // concurrent caller that finds no entry always finds the marker.
        let claimed = match self.entries.entry(key) {
            MapEntry::Occupied(occupied) => {
                let earlier = self.in_flight_for(key);
                let gate = Completion::deferred(async move {
                    if let Ok(completion) = receiver.await {
                        completion.await;
                    }
                });
                self.in_flight.insert(
                    key,
                    InFlight {
                        target: occupied.get().target.clone(),
                        set: Arc::clone(&occupied.get().set),
                        completion: gate,
                    },
                );
                Some((occupied.remove(), earlier))
            }
            MapEntry::Vacant(_) => None,
        };

        let Some((entry, earlier)) = claimed else {
            return self.in_flight_for(key).unwrap_or_default();
        };

        let set = Arc::clone(&entry.set);
        let completion = self.execute(entry);
        let completion = match earlier {
            Some(earlier) => earlier.join(completion),
            None => completion,
        };
        let completion = if completion.is_complete() {
            completion
        } else {
            self.release_when_settled(key, &set, completion)
        };
        // The gate may already be gone if its waiters were dropped.
        let _ = sender.send(completion.clone());

        if completion.is_complete() {
            self.in_flight
                .remove_if(&key, |_, in_flight| Arc::ptr_eq(&in_flight.set, &set));
        } else if let Some(mut in_flight) = self.in_flight.get_mut(&key) {
            if Arc::ptr_eq(&in_flight.set, &set) {
                in_flight.completion = completion.clone();
            }
        }
        completion
    }

    /// Chain the removal of this call's in-flight marker after `completion`
    fn release_when_settled(
        self: &Arc<Self>,
        key: ObjectKey,
        set: &Arc<DisposerSet>,
        completion: Completion,
    ) -> Completion {
        let engine = Arc::downgrade(self);
        let set = Arc::clone(set);
        Completion::from_future(async move {
            completion.await;
            if let Some(engine) = engine.upgrade() {
                engine
                    .in_flight
                    .remove_if(&key, |_, in_flight| Arc::ptr_eq(&in_flight.set, &set));
            }
        })
    }

    fn in_flight_for(&self, key: ObjectKey) -> Option<Completion> {
        let completion = self
            .in_flight
            .get(&key)
            .map(|in_flight| in_flight.completion.clone())?;
        if completion.is_complete() {
            self.in_flight
                .remove_if(&key, |_, in_flight| in_flight.completion.is_complete());
            return None;
        }
        Some(completion)
    }

    fn execute(&self, entry: Entry) -> Completion {
        if let Some(token) = entry.token {
            self.host.cancel(token);
        }
        let disposers = entry.set.take();
        self.disposals.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            object = entry.set.key(),
            disposers = disposers.len(),
            "disposing object"
        );
        disposer::run_all(disposers, Some(self.sink.clone()))
    }

    /// Automatic path, entered from a host-run [`Finalizer`]
    pub(crate) fn finalize(&self, set: &Arc<DisposerSet>) -> Completion {
        let key = set.key();
        self.entries
            .remove_if(&key, |_, entry| Arc::ptr_eq(&entry.set, set));

        let disposers = set.take();
        if disposers.is_empty() {
            return Completion::ready();
        }
        self.finalizations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            object = key,
            disposers = disposers.len(),
            "finalizing unreachable object"
        );
        disposer::run_all(disposers, Some(self.sink.clone()))
    }

    fn detach(&self, key: ObjectKey) -> bool {
        let Some((_, entry)) = self.entries.remove(&key) else {
            return false;
        };
        if let Some(token) = entry.token {
            self.host.cancel(token);
        }
        let dropped = entry.set.take().len();
        tracing::trace!(object = key, dropped, "detached disposers");
        true
    }

    fn detach_one(&self, key: ObjectKey, disposer: &Disposer) -> bool {
        let removed = match self.entries.get(&key) {
            Some(entry) => entry.set.remove(disposer.id()),
            None => false,
        };
        if !removed {
            return false;
        }

        if let Some((_, entry)) = self.entries.remove_if(&key, |_, entry| entry.set.is_empty()) {
            if let Some(token) = entry.token {
                self.host.cancel(token);
            }
        }
        tracing::trace!(
            object = key,
            disposer = disposer.id().as_u64(),
            "detached disposer"
        );
        true
    }

    fn pending_count(&self, key: ObjectKey) -> usize {
        self.entries.get(&key).map_or(0, |entry| entry.set.len())
    }

    fn collect(&self) -> SweepReport {
        let report = self.host.sweep();
        self.in_flight.retain(|_, in_flight| {
            in_flight.target.strong_count() > 0 && !in_flight.completion.is_complete()
        });
        if report.finalized > 0 {
            tracing::debug!(
                finalized = report.finalized,
                tracked = self.entries.len(),
                "collected unreachable objects"
            );
        }
        report
    }
}

/// Attaches disposers to objects and runs them exactly once
///
/// Clones share the same store. Most applications use the process-wide
/// [`AutoDisposer::global`] through the crate-level functions; tests and
/// libraries that need isolation build their own with
/// [`with_config`](Self::with_config).
///
/// The engine never keeps a tracked object alive. A disposer that captures
/// its own object does, and that object will then only be cleaned up by an
/// explicit `dispose`.
///
/// # Examples
///
/// ```
/// use autodispose::{AutoDisposer, Disposer};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// struct Connection { id: u32 }
///
/// let engine = AutoDisposer::new();
/// let closed = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&closed);
///
/// let conn = Arc::new(Connection { id: 7 });
/// engine.attach(&conn, Disposer::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }))?;
/// assert!(engine.has_pending(&conn));
///
/// let _ = engine.dispose(&conn);
/// let _ = engine.dispose(&conn);
/// assert_eq!(closed.load(Ordering::SeqCst), 1);
/// assert!(!engine.has_pending(&conn));
/// # Ok::<(), autodispose::DisposeError>(())
/// ```
#[derive(Clone)]
pub struct AutoDisposer {
    shared: Arc<Shared>,
}

static GLOBAL_ENGINE: Lazy<AutoDisposer> = Lazy::new(AutoDisposer::new);

impl AutoDisposer {
    pub fn new() -> Self {
        Self::with_config(AutoDisposerConfig::default())
    }

    pub fn with_config(config: AutoDisposerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// The process-wide engine
    pub fn global() -> &'static AutoDisposer {
        &GLOBAL_ENGINE
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.shared.adapters
    }

    pub fn host(&self) -> &Arc<dyn FinalizationHost> {
        &self.shared.host
    }

    /// Attach `disposer` to `object`
    ///
    /// Fails with [`DisposeError::Untrackable`](crate::DisposeError::Untrackable)
    /// for primitives, text and other untrackable values. `None` is accepted
    /// and ignored. Attaching the same disposer twice is a no-op.
    pub fn attach<T>(
        &self,
        object: &Arc<T>,
        disposer: impl Into<Option<Disposer>>,
    ) -> DisposeResult<()>
    where
        T: Any + Send + Sync,
    {
        guard::ensure_trackable(&**object)?;
        if let Some(disposer) = disposer.into() {
            self.shared.insert(object, vec![disposer]);
        }
        Ok(())
    }

    /// Attach several disposers at once, in order
    pub fn attach_many<T, I>(&self, object: &Arc<T>, disposers: I) -> DisposeResult<()>
    where
        T: Any + Send + Sync,
        I: IntoIterator<Item = Disposer>,
    {
        guard::ensure_trackable(&**object)?;
        self.shared.insert(object, disposers.into_iter().collect());
        Ok(())
    }

    /// Resolve `resource` through the adapter registry and attach the
    /// resulting disposer to `owner`
    ///
    /// Returns the attached disposer so it can later be passed to
    /// [`detach_one`](Self::detach_one).
    pub fn attach_resource<O, R>(
        &self,
        owner: &Arc<O>,
        resource: &Arc<R>,
    ) -> DisposeResult<Disposer>
    where
        O: Any + Send + Sync,
        R: Any + Send + Sync,
    {
        guard::ensure_trackable(&**owner)?;
        let disposer = self.shared.adapters.require(resource)?;
        self.shared.insert(owner, vec![disposer.clone()]);
        Ok(disposer)
    }

    /// Skips the trackability check; for owners known to be trackable
    pub(crate) fn attach_unchecked<T>(&self, object: &Arc<T>, disposer: Disposer)
    where
        T: Any + Send + Sync,
    {
        self.shared.insert(object, vec![disposer]);
    }

    /// Run every pending disposer of `object`, in attachment order
    ///
    /// The finalization registration is cancelled first. Failures go to the
    /// error sink and never stop the remaining disposers. The returned
    /// completion resolves once asynchronous disposers have settled,
    /// including those of an earlier `dispose` of the same object that is
    /// still running. With nothing attached it is already complete.
    ///
    /// Inside a Tokio runtime the asynchronous disposers are spawned and run
    /// whether or not the completion is awaited. Outside one they run only
    /// when it is awaited.
    pub fn dispose<T: ?Sized>(&self, object: &Arc<T>) -> Completion {
        self.shared.dispose(object_key(object))
    }

    /// Drop every pending disposer of `object` without running it
    ///
    /// Returns false if nothing was attached.
    pub fn detach<T: ?Sized>(&self, object: &Arc<T>) -> bool {
        self.shared.detach(object_key(object))
    }

    /// Drop one pending disposer of `object` without running it
    pub fn detach_one<T: ?Sized>(&self, object: &Arc<T>, disposer: &Disposer) -> bool {
        self.shared.detach_one(object_key(object), disposer)
    }

    pub fn has_pending<T: ?Sized>(&self, object: &Arc<T>) -> bool {
        self.pending_count(object) > 0
    }

    pub fn pending_count<T: ?Sized>(&self, object: &Arc<T>) -> usize {
        self.shared.pending_count(object_key(object))
    }

    /// Ask the host to finalize objects that have become unreachable
    ///
    /// Synchronous disposers run before this returns. As with
    /// [`dispose`](Self::dispose), asynchronous ones need a Tokio runtime or
    /// an await of `SweepReport::completion`.
    pub fn collect(&self) -> SweepReport {
        self.shared.collect()
    }

    /// Forward batched finalization registrations to the host
    pub fn flush_registrations(&self) -> usize {
        self.shared.host.flush()
    }

    /// Run [`collect`](Self::collect) every `period` on the current Tokio
    /// runtime
    ///
    /// The task stops once every handle to the engine has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime or if `period` is zero.
    pub fn spawn_collector(&self, period: Duration) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = shared.upgrade() else {
                    break;
                };
                let report = engine.collect();
                drop(engine);
                report.completion.await;
            }
            tracing::debug!("collector stopped: engine dropped");
        })
    }

    pub fn stats(&self) -> EngineStats {
        let shared = &self.shared;
        EngineStats {
            tracked_objects: shared.entries.len(),
            pending_disposers: shared.entries.iter().map(|entry| entry.set.len()).sum(),
            registrations: shared.host.live(),
            in_flight: shared.in_flight.len(),
            disposals: shared.disposals.load(Ordering::Relaxed),
            finalizations: shared.finalizations.load(Ordering::Relaxed),
            failures_reported: shared.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for AutoDisposer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AutoDisposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoDisposer")
            .field("tracked_objects", &self.shared.entries.len())
            .field("adapters", &self.shared.adapters)
            .finish()
    }
}

/// Counters reported by [`AutoDisposer::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Objects with at least one pending disposer
    pub tracked_objects: usize,
    pub pending_disposers: usize,
    /// Live registrations with the finalization host
    pub registrations: usize,
    /// Dispose calls whose asynchronous disposers may still be running
    pub in_flight: usize,
    /// Manual disposals that ran at least one disposer
    pub disposals: usize,
    /// Automatic disposals run by finalizers
    pub finalizations: usize,
    /// Disposer failures handed to the error sink
    pub failures_reported: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalization::mocks::MockFinalizationHost;
    use parking_lot::Mutex;

    struct Resource {
        _name: &'static str,
    }

    fn resource() -> Arc<Resource> {
        Arc::new(Resource { _name: "resource" })
    }

    fn engine_with_mock() -> (AutoDisposer, Arc<MockFinalizationHost>) {
        let host = Arc::new(MockFinalizationHost::new());
        let engine = AutoDisposer::with_config(
            AutoDisposerConfig::default()
                .with_host(Arc::clone(&host))
                .with_adapters(Arc::new(AdapterRegistry::new()))
                .with_error_sink(ErrorSink::new(|_| {})),
        );
        (engine, host)
    }

    fn logging(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Disposer {
        let log = Arc::clone(log);
        Disposer::new(move || log.lock().push(name)).labeled(name)
    }

    #[test]
    fn one_registration_per_object() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));

        engine.attach(&object, logging(&log, "a")).unwrap();
        engine.attach(&object, logging(&log, "b")).unwrap();
        engine.attach_many(&object, [logging(&log, "c")]).unwrap();

        assert_eq!(host.register_call_count(), 1);
        assert_eq!(engine.pending_count(&object), 3);
    }

    #[test]
    fn registration_does_not_keep_the_object_alive() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        engine.attach(&object, Disposer::new(|| {})).unwrap();

        let token = host.tokens()[0];
        assert_eq!(Arc::strong_count(&object), 1);
        assert_eq!(host.target_alive(token), Some(true));
        drop(object);
        assert_eq!(host.target_alive(token), Some(false));
    }

    #[test]
    fn dispose_cancels_the_registration_first() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.attach(&object, logging(&log, "a")).unwrap();
        let token = host.tokens()[0];

        assert!(engine.dispose(&object).is_complete());
        assert_eq!(host.cancel_call_count(), 1);
        assert!(!host.contains(token));
        assert_eq!(*log.lock(), ["a"]);
    }

    #[test]
    fn finalizer_runs_the_captured_set_once() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.attach(&object, logging(&log, "a")).unwrap();
        engine.attach(&object, logging(&log, "b")).unwrap();
        let token = host.tokens()[0];
        drop(object);

        let completion = host.trigger(token).expect("registered");
        assert!(completion.is_complete());
        assert_eq!(*log.lock(), ["a", "b"]);
        assert_eq!(engine.stats().tracked_objects, 0);
        assert_eq!(engine.stats().finalizations, 1);
        assert!(host.trigger(token).is_none());
    }

    #[test]
    fn manual_dispose_wins_over_a_late_finalizer() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.attach(&object, logging(&log, "a")).unwrap();

        let set = Arc::clone(&engine.shared.entries.get(&object_key(&object)).unwrap().set);
        let _ = engine.dispose(&object);

        // A host that raced past the cancel still finds the set drained.
        let late = Finalizer::new(set, Arc::downgrade(&engine.shared));
        assert!(late.run().is_complete());
        assert_eq!(*log.lock(), ["a"]);
        assert_eq!(host.live(), 0);
    }

    #[test]
    fn detach_cancels_without_running() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));
        engine.attach(&object, logging(&log, "a")).unwrap();

        assert!(engine.detach(&object));
        assert!(!engine.detach(&object));
        assert_eq!(host.live(), 0);
        assert!(engine.dispose(&object).is_complete());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn detach_one_keeps_the_registration_until_empty() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = logging(&log, "a");
        let b = logging(&log, "b");
        engine.attach_many(&object, [a.clone(), b.clone()]).unwrap();

        assert!(engine.detach_one(&object, &a));
        assert!(!engine.detach_one(&object, &a));
        assert_eq!(host.live(), 1);

        assert!(engine.detach_one(&object, &b));
        assert_eq!(host.live(), 0);
        assert!(!engine.has_pending(&object));

        engine.attach(&object, a).unwrap();
        assert_eq!(host.register_call_count(), 2);
    }

    #[test]
    fn untrackable_values_are_refused() {
        let (engine, host) = engine_with_mock();
        let err = engine.attach(&Arc::new(42_u64), Disposer::new(|| {})).unwrap_err();
        assert!(err.is_unsupported_operation());
        assert!(engine
            .attach_many(&Arc::new(String::from("s")), Vec::<Disposer>::new())
            .is_err());
        assert_eq!(host.register_call_count(), 0);
    }

    #[test]
    fn absent_disposer_and_empty_batches_are_ignored() {
        let (engine, host) = engine_with_mock();
        let object = resource();
        engine.attach(&object, None::<Disposer>).unwrap();
        engine.attach_many(&object, Vec::new()).unwrap();
        assert!(!engine.has_pending(&object));
        assert_eq!(host.register_call_count(), 0);
    }

    #[test]
    fn attach_resource_requires_an_adapter() {
        let (engine, _host) = engine_with_mock();
        let owner = resource();
        let err = engine.attach_resource(&owner, &Arc::new(vec![1u8])).unwrap_err();
        assert!(err.is_unsupported_operation());

        engine.adapters().register_adapter(|_: &Arc<Vec<u8>>| Disposer::new(|| {}));
        let disposer = engine.attach_resource(&owner, &Arc::new(vec![1u8])).unwrap();
        assert_eq!(engine.pending_count(&owner), 1);
        assert!(engine.detach_one(&owner, &disposer));
    }

    #[test]
    fn failures_are_counted_and_routed_to_the_engine_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let engine = AutoDisposer::with_config(
            AutoDisposerConfig::default()
                .with_host(MockFinalizationHost::new())
                .with_error_sink(ErrorSink::new(move |err| log.lock().push(err.to_string()))),
        );
        let object = resource();
        engine
            .attach_many(
                &object,
                [
                    Disposer::fallible(|| Err("broken pipe")).labeled("pipe"),
                    Disposer::new(|| {}),
                ],
            )
            .unwrap();

        assert!(engine.dispose(&object).is_complete());
        assert_eq!(*seen.lock(), ["disposer `pipe` failed: broken pipe"]);
        let stats = engine.stats();
        assert_eq!(stats.failures_reported, 1);
        assert_eq!(stats.disposals, 1);
    }

    #[test]
    fn second_dispose_joins_the_running_one() {
        let (engine, _host) = engine_with_mock();
        let object = resource();
        let (release, released) = oneshot::channel::<()>();
        let released = Mutex::new(Some(released));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        engine
            .attach(
                &object,
                Disposer::from_outcome(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let waiter = released.lock().take();
                    Ok(crate::Outcome::pending(async move {
                        if let Some(waiter) = waiter {
                            let _ = waiter.await;
                        }
                        Ok::<(), crate::BoxError>(())
                    }))
                }),
            )
            .unwrap();

        let first = engine.dispose(&object);
        let second = engine.dispose(&object);
        assert!(!first.is_complete());
        assert!(!second.is_complete());
        assert_eq!(engine.stats().in_flight, 1);

        release.send(()).unwrap();
        futures::executor::block_on(second);
        assert!(first.is_complete());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().in_flight, 0);
    }
}
