//! Default finalization host built on `Weak` reachability.
//!
//! Rust frees a value as soon as its last `Arc` goes away, so there is no
//! collector to ask. Instead every registration keeps a `Weak` to its target
//! and [`sweep`](FinalizationHost::sweep) runs the finalizers of targets whose
//! strong count has dropped to zero.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{FinalizationHost, FinalizationToken, Finalizer, SweepReport, WeakTarget};
use crate::completion::Completion;

struct Registration {
    target: WeakTarget,
    finalizer: Finalizer,
}

/// Registry of weak targets awaiting finalization
pub struct WeakRegistry {
    registrations: DashMap<FinalizationToken, Registration>,
    total_registered: AtomicUsize,
    total_cancelled: AtomicUsize,
    total_finalized: AtomicUsize,
}

impl WeakRegistry {
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            total_registered: AtomicUsize::new(0),
            total_cancelled: AtomicUsize::new(0),
            total_finalized: AtomicUsize::new(0),
        }
    }

    /// Get statistics for this registry
    pub fn get_stats(&self) -> WeakRegistryStats {
        WeakRegistryStats {
            live: self.registrations.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_cancelled: self.total_cancelled.load(Ordering::Relaxed),
            total_finalized: self.total_finalized.load(Ordering::Relaxed),
        }
    }
}

impl Default for WeakRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalizationHost for WeakRegistry {
    fn register(&self, target: WeakTarget, finalizer: Finalizer) -> FinalizationToken {
        let token = FinalizationToken::next();
        self.registrations
            .insert(token, Registration { target, finalizer });
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        token
    }

    fn cancel(&self, token: FinalizationToken) -> bool {
        let cancelled = self.registrations.remove(&token).is_some();
        if cancelled {
            self.total_cancelled.fetch_add(1, Ordering::Relaxed);
        }
        cancelled
    }

    fn contains(&self, token: FinalizationToken) -> bool {
        self.registrations.contains_key(&token)
    }

    fn live(&self) -> usize {
        self.registrations.len()
    }

    fn sweep(&self) -> SweepReport {
        // Collect first: finalizers may call back into `cancel`/`register`.
        let dead: Vec<FinalizationToken> = self
            .registrations
            .iter()
            .filter(|entry| entry.target.strong_count() == 0)
            .map(|entry| *entry.key())
            .collect();

        let mut completions = Vec::with_capacity(dead.len());
        for token in dead {
            if let Some((_, registration)) = self.registrations.remove(&token) {
                completions.push(registration.finalizer.run());
            }
        }

        let finalized = completions.len();
        if finalized > 0 {
            self.total_finalized.fetch_add(finalized, Ordering::Relaxed);
            tracing::debug!(finalized, live = self.registrations.len(), "weak registry sweep");
        }

        SweepReport {
            finalized,
            completion: Completion::all(completions),
        }
    }
}

impl std::fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("live", &self.registrations.len())
            .finish()
    }
}

/// Statistics for a [`WeakRegistry`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeakRegistryStats {
    /// Registrations still waiting for their target to die
    pub live: usize,
    /// Total registrations ever made
    pub total_registered: usize,
    /// Registrations removed through `cancel`
    pub total_cancelled: usize,
    /// Finalizers run by sweeps
    pub total_finalized: usize,
}
