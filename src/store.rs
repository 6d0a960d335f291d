//! Per-object disposer sets.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::disposer::{Disposer, DisposerId};
use crate::finalization::{FinalizationToken, WeakTarget};

/// Identity of a tracked object: the address of its `Arc` allocation
///
/// The store holds a `Weak` to every keyed object, which keeps the allocation
/// (not the value) alive, so a key is never reused while an entry exists.
pub(crate) type ObjectKey = usize;

pub(crate) fn object_key<T: ?Sized>(object: &Arc<T>) -> ObjectKey {
    Arc::as_ptr(object) as *const () as usize
}

pub(crate) fn weak_target<T: Any + Send + Sync>(object: &Arc<T>) -> WeakTarget {
    Arc::downgrade(object) as Weak<dyn Any + Send + Sync>
}

/// Insertion-ordered set of the disposers pending for one object
///
/// The set is shared between the store entry and the object's finalizer. Once
/// drained by [`take`](Self::take) it stays empty, which is what makes the
/// manual and automatic paths mutually exclusive.
pub struct DisposerSet {
    key: ObjectKey,
    disposers: Mutex<IndexMap<DisposerId, Disposer>>,
}

impl DisposerSet {
    pub(crate) fn new(key: ObjectKey) -> Self {
        Self {
            key,
            disposers: Mutex::new(IndexMap::new()),
        }
    }

    pub(crate) fn key(&self) -> ObjectKey {
        self.key
    }

    /// Insert `disposer`; returns false if the same disposer is already present
    pub(crate) fn insert(&self, disposer: Disposer) -> bool {
        let mut disposers = self.disposers.lock();
        if disposers.contains_key(&disposer.id()) {
            return false;
        }
        disposers.insert(disposer.id(), disposer);
        true
    }

    pub(crate) fn remove(&self, id: DisposerId) -> bool {
        self.disposers.lock().shift_remove(&id).is_some()
    }

    /// Drain every disposer, in insertion order
    pub(crate) fn take(&self) -> Vec<Disposer> {
        let drained = std::mem::take(&mut *self.disposers.lock());
        drained.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.disposers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DisposerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposerSet")
            .field("key", &format_args!("{:#x}", self.key))
            .field("pending", &self.len())
            .finish()
    }
}

/// Store entry for one tracked object
pub(crate) struct Entry {
    pub(crate) target: WeakTarget,
    pub(crate) set: Arc<DisposerSet>,
    pub(crate) token: Option<FinalizationToken>,
}

impl Entry {
    pub(crate) fn new<T: Any + Send + Sync>(object: &Arc<T>) -> Self {
        Self {
            target: weak_target(object),
            set: Arc::new(DisposerSet::new(object_key(object))),
            token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_arc_identity() {
        let first = Arc::new(vec![1u8]);
        let clone = Arc::clone(&first);
        let other = Arc::new(vec![1u8]);

        assert_eq!(object_key(&first), object_key(&clone));
        assert_ne!(object_key(&first), object_key(&other));
    }

    #[test]
    fn weak_target_does_not_keep_the_value_alive() {
        let object = Arc::new(vec![0u8; 4]);
        let target = weak_target(&object);
        assert_eq!(target.strong_count(), 1);
        drop(object);
        assert_eq!(target.strong_count(), 0);
        assert!(target.upgrade().is_none());
    }

    #[test]
    fn set_deduplicates_and_keeps_insertion_order() {
        let set = DisposerSet::new(0x10);
        let a = Disposer::new(|| {}).labeled("a");
        let b = Disposer::new(|| {}).labeled("b");
        let c = Disposer::new(|| {}).labeled("c");

        assert!(set.insert(a.clone()));
        assert!(set.insert(b.clone()));
        assert!(!set.insert(a.clone()));
        assert!(set.insert(c.clone()));
        assert_eq!(set.len(), 3);

        assert!(set.remove(b.id()));
        assert!(!set.remove(b.id()));

        let labels: Vec<_> = set.take().iter().filter_map(Disposer::label).collect();
        assert_eq!(labels, ["a", "c"]);
        assert!(set.is_empty());
        assert!(set.take().is_empty());
    }
}
