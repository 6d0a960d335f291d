//! Built-in handlers for well-known resource capabilities.
//!
//! Rust cannot ask an arbitrary value whether it implements a trait, so each
//! capability is matched through the concrete types it is usually stored as:
//! a boxed trait object (`Box<dyn Close>` and friends) or one of the Tokio
//! task handles. Wrap a resource as `Arc::new(Box::new(r) as Box<dyn Close>)`
//! to have it picked up here; any other type needs a registered adapter.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, Either, FutureExt};
use futures_timer::Delay;
use tokio::task::{AbortHandle, JoinHandle};

use super::AnyObject;
use crate::disposable::Disposable;
use crate::disposer::{Disposer, Outcome};
use crate::error::BoxError;

/// A resource with its own dispose operation
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> Outcome;
}

/// A cancellable subscription; cancelling may complete asynchronously
pub trait Subscription: Send + Sync {
    fn cancel(&self) -> Outcome;
}

/// A cancellable timer
pub trait Timer: Send + Sync {
    fn cancel(&self);
}

/// A stream whose close completes once its consumers have drained it
///
/// A stream without a listener may never finish closing, so the close is only
/// awaited up to the registry's close timeout.
pub trait CloseStream: Send + Sync {
    fn close(&self) -> BoxFuture<'static, Result<(), BoxError>>;
}

/// A sink that closes synchronously
pub trait Close: Send + Sync {
    fn close(&self) -> Result<(), BoxError>;
}

/// Built-in handler kinds, in resolution priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    /// [`Disposable`] or `Box<dyn Dispose>`
    Disposable,
    /// `Box<dyn Subscription>` or a Tokio [`AbortHandle`]
    Subscription,
    /// `Box<dyn Timer>` or a Tokio `JoinHandle<()>`
    Timer,
    /// `Box<dyn CloseStream>`, with a bounded close wait
    Stream,
    /// `Box<dyn Close>`
    Sink,
}

impl BuiltinKind {
    pub const PRIORITY: [BuiltinKind; 5] = [
        BuiltinKind::Disposable,
        BuiltinKind::Subscription,
        BuiltinKind::Timer,
        BuiltinKind::Stream,
        BuiltinKind::Sink,
    ];

    /// The first built-in kind that handles `object`
    pub fn of(object: &(dyn Any + Send + Sync)) -> Option<BuiltinKind> {
        Self::PRIORITY.into_iter().find(|kind| kind.matches(object))
    }

    pub fn matches(self, object: &(dyn Any + Send + Sync)) -> bool {
        match self {
            BuiltinKind::Disposable => object.is::<Disposable>() || object.is::<Box<dyn Dispose>>(),
            BuiltinKind::Subscription => {
                object.is::<Box<dyn Subscription>>() || object.is::<AbortHandle>()
            }
            BuiltinKind::Timer => object.is::<Box<dyn Timer>>() || object.is::<JoinHandle<()>>(),
            BuiltinKind::Stream => object.is::<Box<dyn CloseStream>>(),
            BuiltinKind::Sink => object.is::<Box<dyn Close>>(),
        }
    }

    /// Build the disposer for `object`, or `None` if this kind does not apply
    pub(crate) fn convert(self, object: &AnyObject, close_timeout: Duration) -> Option<Disposer> {
        let disposer = match self {
            BuiltinKind::Disposable => {
                if let Some(disposable) = typed::<Disposable>(object) {
                    Disposable::disposer_for(disposable)
                } else {
                    let resource = typed::<Box<dyn Dispose>>(object)?;
                    Disposer::from_outcome(move || Ok(resource.dispose()))
                }
                .labeled("dispose")
            }
            BuiltinKind::Subscription => {
                if let Some(handle) = typed::<AbortHandle>(object) {
                    Disposer::new(move || handle.abort())
                } else {
                    let subscription = typed::<Box<dyn Subscription>>(object)?;
                    Disposer::from_outcome(move || Ok(subscription.cancel()))
                }
                .labeled("cancel subscription")
            }
            BuiltinKind::Timer => {
                if let Some(handle) = typed::<JoinHandle<()>>(object) {
                    Disposer::new(move || handle.abort())
                } else {
                    let timer = typed::<Box<dyn Timer>>(object)?;
                    Disposer::new(move || timer.cancel())
                }
                .labeled("cancel timer")
            }
            BuiltinKind::Stream => {
                let stream = typed::<Box<dyn CloseStream>>(object)?;
                Disposer::from_outcome(move || {
                    let closing = stream.close();
                    Ok(Outcome::Pending(bounded_close(closing, close_timeout)))
                })
                .labeled("close stream")
            }
            BuiltinKind::Sink => {
                let sink = typed::<Box<dyn Close>>(object)?;
                Disposer::fallible(move || sink.close()).labeled("close sink")
            }
        };
        Some(disposer)
    }
}

fn typed<C: Any + Send + Sync>(object: &AnyObject) -> Option<Arc<C>> {
    Arc::clone(object).downcast::<C>().ok()
}

/// Wait for `closing` for at most `limit`
///
/// Uses the Tokio timer when polled inside a runtime, a runtime-agnostic
/// delay otherwise.
fn bounded_close(
    closing: BoxFuture<'static, Result<(), BoxError>>,
    limit: Duration,
) -> BoxFuture<'static, Result<(), BoxError>> {
    async move {
        let finished = if tokio::runtime::Handle::try_current().is_ok() {
            tokio::time::timeout(limit, closing).await.ok()
        } else {
            match future::select(closing, Delay::new(limit)).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(((), _)) => None,
            }
        };
        finished.unwrap_or_else(|| {
            tracing::warn!(?limit, "stream close did not finish in time; giving up waiting");
            Ok(())
        })
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(Arc<AtomicUsize>);

    impl Close for CountingSink {
        fn close(&self) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubbornStream;

    struct PromptStream(Arc<AtomicUsize>);

    impl CloseStream for PromptStream {
        fn close(&self) -> BoxFuture<'static, Result<(), BoxError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(())).boxed()
        }
    }

    impl CloseStream for StubbornStream {
        fn close(&self) -> BoxFuture<'static, Result<(), BoxError>> {
            futures::future::pending().boxed()
        }
    }

    #[test]
    fn plain_values_match_nothing() {
        let object: AnyObject = Arc::new(vec![1, 2, 3]);
        assert_eq!(BuiltinKind::of(&*object), None);
        assert!(BuiltinKind::Sink.convert(&object, Duration::from_millis(1)).is_none());
    }

    #[test]
    fn sink_is_closed_synchronously() {
        let closes = Arc::new(AtomicUsize::new(0));
        let object: AnyObject =
            Arc::new(Box::new(CountingSink(Arc::clone(&closes))) as Box<dyn Close>);

        assert_eq!(BuiltinKind::of(&*object), Some(BuiltinKind::Sink));
        let disposer = BuiltinKind::Sink
            .convert(&object, Duration::from_millis(10))
            .expect("sink disposer");
        assert_eq!(disposer.label(), Some("close sink"));
        assert!(matches!(disposer.invoke(), Ok(None)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_close_is_bounded() {
        let object: AnyObject = Arc::new(Box::new(StubbornStream) as Box<dyn CloseStream>);
        let disposer = BuiltinKind::Stream
            .convert(&object, Duration::from_millis(10))
            .expect("stream disposer");

        let Ok(Some(tail)) = disposer.invoke() else {
            panic!("stream close should be asynchronous");
        };
        let result = tokio::time::timeout(Duration::from_secs(1), tail).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[test]
    fn stream_close_works_without_a_runtime() {
        let closes = Arc::new(AtomicUsize::new(0));
        let prompt: AnyObject =
            Arc::new(Box::new(PromptStream(Arc::clone(&closes))) as Box<dyn CloseStream>);
        let stubborn: AnyObject = Arc::new(Box::new(StubbornStream) as Box<dyn CloseStream>);

        for object in [prompt, stubborn] {
            let disposer = BuiltinKind::Stream
                .convert(&object, Duration::from_millis(10))
                .expect("stream disposer");
            let Ok(Some(tail)) = disposer.invoke() else {
                panic!("stream close should be asynchronous");
            };
            assert!(matches!(futures::executor::block_on(tail), Ok(())));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_handles_are_timers() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let abort = handle.abort_handle();
        let object: AnyObject = Arc::new(handle);

        assert_eq!(BuiltinKind::of(&*object), Some(BuiltinKind::Timer));
        let disposer = BuiltinKind::Timer
            .convert(&object, Duration::from_millis(10))
            .expect("timer disposer");
        assert!(matches!(disposer.invoke(), Ok(None)));

        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}
