//! Shared completion handle returned by every dispose path.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt, Shared};

type Tail = Shared<BoxFuture<'static, ()>>;

/// Resolves once every asynchronous disposer launched by a dispose call has
/// settled
///
/// A completion never fails: disposer errors are routed to the error sink
/// before the completion resolves. Clones observe the same underlying work.
///
/// Synchronous-only disposals return an already-complete value. When a
/// completion with pending work is created on a Tokio runtime it is also
/// spawned there, so the work progresses even if every handle is dropped.
/// Outside a runtime the work runs only when the completion is awaited;
/// dropping every handle then drops the asynchronous disposers unrun.
#[must_use = "asynchronous disposers may only run once the completion is awaited"]
#[derive(Clone, Default)]
pub struct Completion {
    tail: Option<Tail>,
}

impl Completion {
    /// A completion with nothing left to wait for
    pub fn ready() -> Self {
        Self { tail: None }
    }

    pub(crate) fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tail = future.boxed().shared();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(tail.clone());
        }
        Self { tail: Some(tail) }
    }

    /// Like `from_future` but never spawned; the work runs only when awaited
    pub(crate) fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            tail: Some(future.boxed().shared()),
        }
    }

    /// Whether all the work behind this completion has finished
    pub fn is_complete(&self) -> bool {
        self.tail.as_ref().map_or(true, |tail| tail.peek().is_some())
    }

    /// A completion that resolves once both `self` and `other` have
    pub fn join(self, other: Completion) -> Completion {
        match (self.tail, other.tail) {
            (None, None) => Completion::ready(),
            (Some(tail), None) | (None, Some(tail)) => Completion { tail: Some(tail) },
            (Some(first), Some(second)) => Completion::from_future(async move {
                futures::future::join(first, second).await;
            }),
        }
    }

    /// A completion that resolves once every completion in `completions` has
    pub fn all<I>(completions: I) -> Completion
    where
        I: IntoIterator<Item = Completion>,
    {
        let pending: Vec<Tail> = completions
            .into_iter()
            .filter(|completion| !completion.is_complete())
            .filter_map(|completion| completion.tail)
            .collect();

        match pending.len() {
            0 => Completion::ready(),
            1 => Completion {
                tail: pending.into_iter().next(),
            },
            _ => Completion::from_future(async move {
                futures::future::join_all(pending).await;
            }),
        }
    }
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.tail.as_mut() {
            None => Poll::Ready(()),
            Some(tail) => tail.poll_unpin(cx),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}
