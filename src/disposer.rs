//! Disposers: cleanup actions with identity.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::completion::Completion;
use crate::error::{BoxError, DisposeError};
use crate::sink::{self, ErrorSink};

/// The still-running part of a disposer, with failures already captured
pub(crate) type Tail = BoxFuture<'static, Result<(), DisposeError>>;

static NEXT_DISPOSER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a disposer; clones of a [`Disposer`] share it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisposerId(u64);

impl DisposerId {
    fn next() -> Self {
        Self(NEXT_DISPOSER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// What a disposer reports after it has been invoked
pub enum Outcome {
    /// Cleanup finished synchronously
    Done,
    /// Cleanup continues asynchronously; failures surface through the future
    Pending(BoxFuture<'static, Result<(), BoxError>>),
}

impl Outcome {
    /// Wrap a future as a pending outcome
    pub fn pending<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Outcome::Pending(
            future
                .map(|result| result.map_err(|err| -> BoxError { err.into() }))
                .boxed(),
        )
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("Done"),
            Outcome::Pending(_) => f.write_str("Pending"),
        }
    }
}

type Action = dyn Fn() -> Result<Outcome, BoxError> + Send + Sync;

/// A zero-argument cleanup action
///
/// Two disposers are equal when they are clones of the same original; that
/// identity is what makes attaching the same disposer twice a no-op.
///
/// # Examples
///
/// ```
/// use autodispose::Disposer;
///
/// let close = Disposer::new(|| println!("closing")).labeled("close");
/// let again = close.clone();
/// assert_eq!(close, again);
/// assert_ne!(close, Disposer::new(|| {}));
/// ```
#[derive(Clone)]
pub struct Disposer {
    id: DisposerId,
    label: Option<&'static str>,
    action: Arc<Action>,
}

impl Disposer {
    /// A synchronous disposer that cannot fail
    pub fn new<F>(action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::from_outcome(move || {
            action();
            Ok(Outcome::Done)
        })
    }

    /// A synchronous disposer that may return an error
    pub fn fallible<F, E>(action: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_outcome(move || match action() {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => Err(err.into()),
        })
    }

    /// A disposer whose cleanup completes asynchronously
    ///
    /// The closure runs when the disposer is invoked; the returned future is
    /// awaited as part of the dispose call's [`Completion`].
    pub fn from_async<F, Fut, E>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self::from_outcome(move || Ok(Outcome::pending(action())))
    }

    /// A disposer that decides per invocation whether it finishes synchronously
    pub fn from_outcome<F>(action: F) -> Self
    where
        F: Fn() -> Result<Outcome, BoxError> + Send + Sync + 'static,
    {
        Self {
            id: DisposerId::next(),
            label: None,
            action: Arc::new(action),
        }
    }

    /// Attach a label used in failure reports and trace events
    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn id(&self) -> DisposerId {
        self.id
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label
    }

    /// Invoke the action, turning errors and panics into [`DisposeError`]s
    ///
    /// Returns the still-running part of the cleanup, if any. Its future never
    /// panics and yields the failure instead.
    pub(crate) fn invoke(&self) -> Result<Option<Tail>, DisposeError> {
        let label = self.label;
        match catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            Ok(Ok(Outcome::Done)) => Ok(None),
            Ok(Ok(Outcome::Pending(future))) => {
                let guarded = AssertUnwindSafe(future)
                    .catch_unwind()
                    .map(move |result| match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(source)) => Err(DisposeError::DisposerFailed { label, source }),
                        Err(payload) => Err(DisposeError::from_panic(label, payload)),
                    });
                Ok(Some(guarded.boxed()))
            }
            Ok(Err(source)) => Err(DisposeError::DisposerFailed { label, source }),
            Err(payload) => Err(DisposeError::from_panic(label, payload)),
        }
    }
}

impl PartialEq for Disposer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Disposer {}

impl Hash for Disposer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

/// Run `disposers` in order and aggregate their asynchronous tails
///
/// Every disposer runs even if earlier ones fail. Failures, synchronous or
/// asynchronous, go to the error sink; the returned completion never fails.
pub(crate) fn run_all<I>(disposers: I, preferred: Option<ErrorSink>) -> Completion
where
    I: IntoIterator<Item = Disposer>,
{
    let mut tails = Vec::new();

    for disposer in disposers {
        match disposer.invoke() {
            Ok(None) => {}
            Ok(Some(tail)) => tails.push(tail),
            Err(err) => sink::report(preferred.as_ref(), &err),
        }
    }

    if tails.is_empty() {
        return Completion::ready();
    }

    Completion::from_future(async move {
        for result in futures::future::join_all(tails).await {
            if let Err(err) = result {
                sink::report(preferred.as_ref(), &err);
            }
        }
    })
}
