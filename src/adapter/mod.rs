//! Type-to-disposer adapter registry
//!
//! Resolution tries the fixed built-in handlers first (see [`BuiltinKind`]),
//! then the user adapters in registration order. The user-adapter outcome,
//! including "no match", is cached per concrete `TypeId` until the registry
//! is mutated.
//!
//! ## Components
//!
//! - **AdapterRegistry**: built-in dispatch, user entries and the lookup cache
//! - **Adapter**: the resolved handler, built-in or user
//! - **builtin**: capability traits recognised without registration

use std::any::{self, Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::disposer::Disposer;
use crate::error::{DisposeError, DisposeResult};

pub mod builtin;

pub use builtin::{BuiltinKind, Close, CloseStream, Dispose, Subscription, Timer};

/// A type-erased tracked value
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// How long a stream close is awaited before giving up
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(10);

type Predicate = dyn Fn(&(dyn Any + Send + Sync)) -> bool + Send + Sync;
type Convert = dyn Fn(&AnyObject) -> Option<Disposer> + Send + Sync;

/// One user-registered adapter
pub struct AdapterEntry {
    /// Set for adapters registered against a concrete type; used by
    /// `unregister_adapters`
    type_id: Option<TypeId>,
    type_name: &'static str,
    predicate: Box<Predicate>,
    convert: Box<Convert>,
}

impl AdapterEntry {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn matches(&self, object: &(dyn Any + Send + Sync)) -> bool {
        (self.predicate)(object)
    }
}

impl fmt::Debug for AdapterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterEntry")
            .field("type_name", &self.type_name)
            .field("exact", &self.type_id.is_some())
            .finish()
    }
}

/// The handler chosen for a value
#[derive(Debug, Clone)]
pub enum Adapter {
    Builtin(BuiltinKind),
    User(Arc<AdapterEntry>),
}

impl Adapter {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Adapter::Builtin(_))
    }

    fn convert(&self, object: &AnyObject, close_timeout: Duration) -> Option<Disposer> {
        match self {
            Adapter::Builtin(kind) => kind.convert(object, close_timeout),
            Adapter::User(entry) => (entry.convert)(object),
        }
    }
}

/// Registry mapping runtime types to disposers
///
/// # Examples
///
/// ```
/// use autodispose::{AdapterRegistry, Disposer};
/// use std::sync::Arc;
///
/// struct Connection;
///
/// let registry = AdapterRegistry::new();
/// registry.register_adapter(|_conn: &Arc<Connection>| Disposer::new(|| {}));
///
/// assert!(registry.resolve(&Arc::new(Connection)).is_some());
/// assert!(registry.resolve(&Arc::new(vec![1u8])).is_none());
/// ```
pub struct AdapterRegistry {
    entries: RwLock<Vec<Arc<AdapterEntry>>>,
    cache: DashMap<TypeId, Option<Arc<AdapterEntry>>>,
    close_timeout: Duration,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

static GLOBAL_ADAPTERS: Lazy<Arc<AdapterRegistry>> = Lazy::new(|| Arc::new(AdapterRegistry::new()));

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            cache: DashMap::new(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<AdapterRegistry> {
        Arc::clone(&GLOBAL_ADAPTERS)
    }

    /// Set how long built-in stream closes are awaited
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Register an adapter for values of exactly type `T`
    ///
    /// Several adapters may be registered for one type; the first one
    /// registered wins.
    pub fn register_adapter<T, F>(&self, convert: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Arc<T>) -> Disposer + Send + Sync + 'static,
    {
        self.push(AdapterEntry {
            type_id: Some(TypeId::of::<T>()),
            type_name: any::type_name::<T>(),
            predicate: Box::new(|object: &(dyn Any + Send + Sync)| object.is::<T>()),
            convert: Box::new(move |object: &AnyObject| {
                let typed = Arc::clone(object).downcast::<T>().ok()?;
                Some(convert(&typed))
            }),
        });
    }

    /// Register an adapter selected by a predicate over the erased value
    ///
    /// The predicate's answer is cached per concrete type, so it must depend
    /// on the type of the value only.
    pub fn register_adapter_matching<P, F>(&self, name: &'static str, predicate: P, convert: F)
    where
        P: Fn(&(dyn Any + Send + Sync)) -> bool + Send + Sync + 'static,
        F: Fn(&AnyObject) -> Disposer + Send + Sync + 'static,
    {
        self.push(AdapterEntry {
            type_id: None,
            type_name: name,
            predicate: Box::new(predicate),
            convert: Box::new(move |object: &AnyObject| Some(convert(object))),
        });
    }

    fn push(&self, entry: AdapterEntry) {
        let mut entries = self.entries.write();
        tracing::trace!(
            type_name = entry.type_name,
            position = entries.len(),
            "registered disposer adapter"
        );
        entries.push(Arc::new(entry));
        self.cache.clear();
    }

    /// Remove every adapter registered for exactly type `T`; returns how many
    pub fn unregister_adapters<T: Any>(&self) -> usize {
        let type_id = TypeId::of::<T>();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.type_id != Some(type_id));
        self.cache.clear();
        before - entries.len()
    }

    /// Remove every user adapter
    pub fn clear_adapters(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.cache.clear();
    }

    /// Number of registered user adapters
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The handler that would be used for `object`
    pub fn adapter_for(&self, object: &(dyn Any + Send + Sync)) -> Option<Adapter> {
        if let Some(kind) = BuiltinKind::of(object) {
            return Some(Adapter::Builtin(kind));
        }
        self.lookup_user(object).map(Adapter::User)
    }

    fn lookup_user(&self, object: &(dyn Any + Send + Sync)) -> Option<Arc<AdapterEntry>> {
        let type_id = Any::type_id(object);
        // Held across lookup and insert so a concurrent mutation cannot leave
        // a stale outcome behind.
        let entries = self.entries.read();

        if let Some(cached) = self.cache.get(&type_id) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached.value().clone();
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let found = entries.iter().find(|entry| entry.matches(object)).cloned();
        self.cache.insert(type_id, found.clone());
        found
    }

    /// Disposer from the built-in handlers only
    pub fn resolve_builtin<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<Disposer> {
        let erased: AnyObject = Arc::clone(object) as AnyObject;
        self.resolve_builtin_any(&erased)
    }

    pub fn resolve_builtin_any(&self, object: &AnyObject) -> Option<Disposer> {
        BuiltinKind::of(&**object)?.convert(object, self.close_timeout)
    }

    /// Disposer for `object`, built-in handlers first
    pub fn resolve<T: Any + Send + Sync>(&self, object: &Arc<T>) -> Option<Disposer> {
        let erased: AnyObject = Arc::clone(object) as AnyObject;
        self.resolve_any(&erased)
    }

    pub fn resolve_any(&self, object: &AnyObject) -> Option<Disposer> {
        self.adapter_for(&**object)?.convert(object, self.close_timeout)
    }

    /// Like [`resolve`](Self::resolve), failing with
    /// [`DisposeError::NoAdapter`] when nothing matches
    pub fn require<T: Any + Send + Sync>(&self, object: &Arc<T>) -> DisposeResult<Disposer> {
        self.resolve(object).ok_or(DisposeError::NoAdapter {
            type_name: any::type_name::<T>(),
        })
    }

    /// Get statistics for this registry
    pub fn get_stats(&self) -> AdapterRegistryStats {
        AdapterRegistryStats {
            user_adapters: self.len(),
            cached_types: self.cache.len(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("user_adapters", &self.len())
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

/// Statistics for an [`AdapterRegistry`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterRegistryStats {
    pub user_adapters: usize,
    /// Types with a cached user-adapter outcome
    pub cached_types: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

/// Register an adapter for `T` in the process-wide registry
pub fn register_adapter<T, F>(convert: F)
where
    T: Any + Send + Sync,
    F: Fn(&Arc<T>) -> Disposer + Send + Sync + 'static,
{
    GLOBAL_ADAPTERS.register_adapter(convert);
}

/// Remove the process-wide adapters for `T`
pub fn unregister_adapters<T: Any>() -> usize {
    GLOBAL_ADAPTERS.unregister_adapters::<T>()
}

/// Remove every process-wide user adapter
pub fn clear_adapters() {
    GLOBAL_ADAPTERS.clear_adapters();
}

/// Resolve through the process-wide registry
pub fn resolve<T: Any + Send + Sync>(object: &Arc<T>) -> Option<Disposer> {
    GLOBAL_ADAPTERS.resolve(object)
}

/// Resolve through the built-in handlers only
pub fn resolve_builtin<T: Any + Send + Sync>(object: &Arc<T>) -> Option<Disposer> {
    GLOBAL_ADAPTERS.resolve_builtin(object)
}
