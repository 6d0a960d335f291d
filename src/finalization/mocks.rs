// Mock finalization host for engine unit tests.
//
// Records every call and lets a test fire a registration on demand, which is
// how the engine's automatic path gets exercised without depending on sweep
// timing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{FinalizationHost, FinalizationToken, Finalizer, SweepReport, WeakTarget};
use crate::completion::Completion;

#[derive(Default)]
pub(crate) struct MockFinalizationHost {
    registrations: Mutex<HashMap<FinalizationToken, (WeakTarget, Finalizer)>>,
    pub(crate) register_calls: AtomicUsize,
    pub(crate) cancel_calls: AtomicUsize,
}

impl MockFinalizationHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_call_count(&self) -> usize {
        self.register_calls.load(Ordering::Acquire)
    }

    pub(crate) fn cancel_call_count(&self) -> usize {
        self.cancel_calls.load(Ordering::Acquire)
    }

    pub(crate) fn tokens(&self) -> Vec<FinalizationToken> {
        let mut tokens: Vec<_> = self.registrations.lock().keys().copied().collect();
        tokens.sort();
        tokens
    }

    /// Whether the registered target still has strong references
    pub(crate) fn target_alive(&self, token: FinalizationToken) -> Option<bool> {
        self.registrations
            .lock()
            .get(&token)
            .map(|(target, _)| target.strong_count() > 0)
    }

    /// Fire a registration as if its target had just become unreachable
    pub(crate) fn trigger(&self, token: FinalizationToken) -> Option<Completion> {
        let registration = self.registrations.lock().remove(&token);
        registration.map(|(_, finalizer)| finalizer.run())
    }
}

impl FinalizationHost for MockFinalizationHost {
    fn register(&self, target: WeakTarget, finalizer: Finalizer) -> FinalizationToken {
        self.register_calls.fetch_add(1, Ordering::Release);
        let token = FinalizationToken::next();
        self.registrations.lock().insert(token, (target, finalizer));
        token
    }

    fn cancel(&self, token: FinalizationToken) -> bool {
        self.cancel_calls.fetch_add(1, Ordering::Release);
        self.registrations.lock().remove(&token).is_some()
    }

    fn contains(&self, token: FinalizationToken) -> bool {
        self.registrations.lock().contains_key(&token)
    }

    fn live(&self) -> usize {
        self.registrations.lock().len()
    }

    fn sweep(&self) -> SweepReport {
        let dead: Vec<_> = self
            .registrations
            .lock()
            .iter()
            .filter(|(_, (target, _))| target.strong_count() == 0)
            .map(|(token, _)| *token)
            .collect();

        let completions: Vec<_> = dead
            .into_iter()
            .filter_map(|token| self.trigger(token))
            .collect();
        SweepReport {
            finalized: completions.len(),
            completion: Completion::all(completions),
        }
    }
}
