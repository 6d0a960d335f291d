//! Blacklist guard: which values may carry disposers.
//!
//! Only values with heap identity can be weakly associated with a disposer
//! set. Primitives, text, type descriptors and value-like enums are rejected
//! up front so that attaching to them fails loudly instead of silently never
//! finalizing.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{DisposeError, DisposeResult};

static UNTRACKABLE_TYPES: Lazy<HashSet<TypeId>> = Lazy::new(|| {
    [
        // absent value
        TypeId::of::<()>(),
        // numbers
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
        TypeId::of::<bool>(),
        TypeId::of::<char>(),
        // text and symbolic names
        TypeId::of::<str>(),
        TypeId::of::<String>(),
        TypeId::of::<&'static str>(),
        TypeId::of::<Box<str>>(),
        TypeId::of::<Arc<str>>(),
        // type descriptors
        TypeId::of::<TypeId>(),
        // value-like enums
        TypeId::of::<std::cmp::Ordering>(),
        TypeId::of::<std::sync::atomic::Ordering>(),
        TypeId::of::<std::num::FpCategory>(),
        TypeId::of::<std::net::Shutdown>(),
    ]
    .into_iter()
    .collect()
});

fn is_trackable_type(type_id: TypeId) -> bool {
    !UNTRACKABLE_TYPES.contains(&type_id)
}

/// Whether `value` can have disposers attached
///
/// `None` stands for the absent value and is never trackable. Rejection is
/// by type: primitives, text, `TypeId` and a fixed set of fieldless std
/// enums. Any other type is accepted, unit structs included, since every
/// `Arc` allocation has its own identity.
///
/// # Examples
///
/// ```
/// use autodispose::is_trackable;
///
/// struct Connection { fd: u32 }
///
/// assert!(is_trackable(Some(&Connection { fd: 3 })));
/// assert!(is_trackable(Some(&vec![1, 2, 3])));
/// assert!(!is_trackable(Some(&42_i64)));
/// assert!(!is_trackable(Some("text")));
/// assert!(!is_trackable::<Connection>(None));
///
/// struct Service;
/// assert!(is_trackable(Some(&Service)));
/// ```
pub fn is_trackable<T: ?Sized + Any>(value: Option<&T>) -> bool {
    value.is_some_and(|_| is_trackable_type(TypeId::of::<T>()))
}

/// Type-erased form of [`is_trackable`], using the dynamic type of `value`
pub fn is_trackable_dyn(value: Option<&(dyn Any + Send + Sync)>) -> bool {
    value.is_some_and(|value| is_trackable_type(Any::type_id(value)))
}

/// Fail with [`DisposeError::Untrackable`] unless `value` is trackable
pub(crate) fn ensure_trackable<T: Any>(value: &T) -> DisposeResult<()> {
    if is_trackable(Some(value)) {
        Ok(())
    } else {
        Err(DisposeError::Untrackable {
            type_name: std::any::type_name::<T>(),
        })
    }
}
