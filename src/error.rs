//! Error types for the disposal engine.

use thiserror::Error;

/// Boxed error produced by user-supplied disposers and adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while attaching or running disposers
///
/// `Untrackable` and `NoAdapter` are usage errors and are returned to the
/// caller. `DisposerFailed` and `DisposerPanicked` only ever reach the error
/// sink; `dispose` never returns them.
///
/// # Examples
///
/// ```
/// use autodispose::error::{DisposeError, DisposeResult};
///
/// let untrackable = DisposeError::Untrackable { type_name: "i32" };
/// assert!(untrackable.is_unsupported_operation());
/// assert_eq!(
///     untrackable.to_string(),
///     "unsupported operation: values of type `i32` cannot be tracked"
/// );
///
/// let failure: DisposeResult<()> = Err(DisposeError::DisposerPanicked {
///     label: None,
///     message: "boom".into(),
/// });
/// assert!(failure.is_err());
/// ```
#[derive(Error, Debug)]
pub enum DisposeError {
    /// The value is a primitive, text, type descriptor or another value-like
    /// type that cannot carry a weak association
    #[error("unsupported operation: values of type `{type_name}` cannot be tracked")]
    Untrackable { type_name: &'static str },
    /// Neither a built-in handler nor a registered adapter knows the type
    #[error("unsupported operation: no disposer adapter for type `{type_name}`")]
    NoAdapter { type_name: &'static str },
    /// A disposer returned an error, synchronously or from its future
    #[error("disposer{} failed: {source}", label_suffix(.label))]
    DisposerFailed {
        label: Option<&'static str>,
        #[source]
        source: BoxError,
    },
    /// A disposer panicked
    #[error("disposer{} panicked: {message}", label_suffix(.label))]
    DisposerPanicked {
        label: Option<&'static str>,
        message: String,
    },
}

fn label_suffix(label: &Option<&'static str>) -> String {
    match label {
        Some(label) => format!(" `{label}`"),
        None => String::new(),
    }
}

impl DisposeError {
    /// Whether this is an API-misuse error (the UnsupportedOperation family)
    pub fn is_unsupported_operation(&self) -> bool {
        matches!(self, Self::Untrackable { .. } | Self::NoAdapter { .. })
    }

    /// Whether this error came out of a running disposer
    pub fn is_disposer_failure(&self) -> bool {
        matches!(
            self,
            Self::DisposerFailed { .. } | Self::DisposerPanicked { .. }
        )
    }

    /// Label of the disposer that failed, if it had one
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::DisposerFailed { label, .. } | Self::DisposerPanicked { label, .. } => *label,
            _ => None,
        }
    }

    pub(crate) fn from_panic(
        label: Option<&'static str>,
        payload: Box<dyn std::any::Any + Send>,
    ) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::DisposerPanicked { label, message }
    }
}

/// Result type for engine operations
pub type DisposeResult<T> = Result<T, DisposeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (
                DisposeError::Untrackable { type_name: "bool" },
                "unsupported operation: values of type `bool` cannot be tracked",
            ),
            (
                DisposeError::NoAdapter { type_name: "Socket" },
                "unsupported operation: no disposer adapter for type `Socket`",
            ),
            (
                DisposeError::DisposerFailed {
                    label: Some("close file"),
                    source: "disk gone".into(),
                },
                "disposer `close file` failed: disk gone",
            ),
            (
                DisposeError::DisposerPanicked {
                    label: None,
                    message: "boom".into(),
                },
                "disposer panicked: boom",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn classification_splits_usage_from_cleanup_errors() {
        let usage = DisposeError::NoAdapter { type_name: "X" };
        assert!(usage.is_unsupported_operation());
        assert!(!usage.is_disposer_failure());

        let cleanup = DisposeError::DisposerFailed {
            label: Some("flush"),
            source: "nope".into(),
        };
        assert!(!cleanup.is_unsupported_operation());
        assert!(cleanup.is_disposer_failure());
        assert_eq!(cleanup.label(), Some("flush"));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = DisposeError::from_panic(None, Box::new("static text"));
        assert_eq!(err.to_string(), "disposer panicked: static text");

        let err = DisposeError::from_panic(Some("t"), Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "disposer `t` panicked: owned");

        let err = DisposeError::from_panic(None, Box::new(7u8));
        assert_eq!(err.to_string(), "disposer panicked: non-string panic payload");
    }

    #[test]
    fn dispose_result_alias_behaves_like_result() {
        fn take_result(value: DisposeResult<usize>) -> usize {
            value.unwrap_or_default()
        }

        assert_eq!(take_result(Ok(42)), 42);
        assert_eq!(
            take_result(Err(DisposeError::Untrackable { type_name: "u8" })),
            0
        );
    }
}
