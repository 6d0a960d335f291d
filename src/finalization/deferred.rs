//! Batched registration in front of another host.
//!
//! Registrations are queued and forwarded to the wrapped host in one batch on
//! [`flush`](FinalizationHost::flush) (and before every sweep). A registration
//! cancelled while still queued is dropped from the queue and never reaches
//! the wrapped host.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{FinalizationHost, FinalizationToken, Finalizer, SweepReport, WeakTarget};

struct Queued {
    token: FinalizationToken,
    target: WeakTarget,
    finalizer: Finalizer,
}

/// Host wrapper that defers registrations until flushed
pub struct DeferredHost<H> {
    inner: H,
    queue: Mutex<Vec<Queued>>,
    /// Outer token -> token issued by the wrapped host
    forwarded: DashMap<FinalizationToken, FinalizationToken>,
    total_flushed: AtomicUsize,
    total_dropped: AtomicUsize,
}

impl<H: FinalizationHost> DeferredHost<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            queue: Mutex::new(Vec::with_capacity(8)),
            forwarded: DashMap::new(),
            total_flushed: AtomicUsize::new(0),
            total_dropped: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Registrations waiting for the next flush
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total registrations forwarded to the wrapped host
    pub fn total_flushed(&self) -> usize {
        self.total_flushed.load(Ordering::Relaxed)
    }

    /// Total registrations cancelled before they were forwarded
    pub fn total_dropped(&self) -> usize {
        self.total_dropped.load(Ordering::Relaxed)
    }
}

impl<H: FinalizationHost> FinalizationHost for DeferredHost<H> {
    fn register(&self, target: WeakTarget, finalizer: Finalizer) -> FinalizationToken {
        let token = FinalizationToken::next();
        self.queue.lock().push(Queued {
            token,
            target,
            finalizer,
        });
        token
    }

    fn cancel(&self, token: FinalizationToken) -> bool {
        {
            let mut queue = self.queue.lock();
            if let Some(position) = queue.iter().position(|queued| queued.token == token) {
                queue.remove(position);
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }

        match self.forwarded.remove(&token) {
            Some((_, inner_token)) => self.inner.cancel(inner_token),
            None => false,
        }
    }

    fn contains(&self, token: FinalizationToken) -> bool {
        if self.queue.lock().iter().any(|queued| queued.token == token) {
            return true;
        }
        self.forwarded
            .get(&token)
            .is_some_and(|inner_token| self.inner.contains(*inner_token))
    }

    fn live(&self) -> usize {
        self.queued() + self.inner.live()
    }

    fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.queue.lock());
        let count = batch.len();

        for queued in batch {
            let inner_token = self.inner.register(queued.target, queued.finalizer);
            self.forwarded.insert(queued.token, inner_token);
        }

        if count > 0 {
            self.total_flushed.fetch_add(count, Ordering::Relaxed);
            tracing::trace!(count, "forwarded deferred finalization registrations");
        }
        count
    }

    fn sweep(&self) -> SweepReport {
        self.flush();
        let report = self.inner.sweep();
        self.forwarded
            .retain(|_, inner_token| self.inner.contains(*inner_token));
        report
    }
}

impl<H> std::fmt::Debug for DeferredHost<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredHost")
            .field("queued", &self.queue.lock().len())
            .field("forwarded", &self.forwarded.len())
            .finish()
    }
}
