//! The event stream type, `listen`, `for_each` and the single-source operators

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::error::{StreamError, StreamResult};
use crate::pull::PullIter;
use crate::scheduler;
use crate::stream::factory::StreamFactory;
use crate::subscription::{CancelHandle, Emitter, Observer, Subscription, Teardown};

/// Producer function: drives delivery through the emitter and returns the
/// subscription's cleanup.
pub type ProducerFn<T> = dyn Fn(Emitter<T>) -> StreamResult<Teardown> + Send + Sync + 'static;

/// A push-based sequence of values ending in at most one error or completion
pub struct EventStream<T> {
    producer: Arc<ProducerFn<T>>,
    factory: StreamFactory,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
            factory: self.factory.clone(),
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("factory", &self.factory.name())
            .finish()
    }
}

/// Observer whose error and completion go straight to `emitter`
pub(crate) fn forward_terminals<T, U>(emitter: &Emitter<U>) -> Observer<T>
where
    U: Send + 'static,
{
    let on_error = emitter.clone();
    let on_complete = emitter.clone();
    Observer::new()
        .on_error(move |e| on_error.error(e))
        .on_complete(move || on_complete.complete())
}

impl<T: Send + 'static> EventStream<T> {
    /// Wrap a producer function in a stream of the global factory
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(Emitter<T>) -> StreamResult<Teardown> + Send + Sync + 'static,
    {
        StreamFactory::global().create(producer)
    }

    pub(crate) fn from_parts(producer: Arc<ProducerFn<T>>, factory: StreamFactory) -> Self {
        Self { producer, factory }
    }

    /// The factory this stream derives new streams through
    pub fn factory(&self) -> &StreamFactory {
        &self.factory
    }

    /// True when both handles share the same producer and factory
    pub fn ptr_eq(&self, other: &EventStream<T>) -> bool {
        let this = Arc::as_ptr(&self.producer) as *const ();
        let that = Arc::as_ptr(&other.producer) as *const ();
        std::ptr::eq(this, that) && self.factory.same_as(&other.factory)
    }

    /// Subscribe. The producer runs synchronously, exactly once, before this
    /// returns; an error it returns is returned here and leaves nothing
    /// subscribed.
    pub fn listen(&self, observer: Observer<T>) -> StreamResult<CancelHandle> {
        let _turn = scheduler::enter_turn();
        let subscription = Subscription::new(observer);
        let emitter = Emitter::new(Arc::clone(&subscription));

        match (self.producer)(emitter) {
            Ok(cleanup) => {
                subscription.start(cleanup)?;
                Ok(CancelHandle::new(subscription))
            }
            Err(e) => {
                log::debug!("[{}] producer failed during listen: {}", self.factory.name(), e);
                subscription.cancel()?;
                Err(e)
            }
        }
    }

    /// Subscribe with every value forwarded to `emitter`
    pub(crate) fn forward_into(&self, emitter: Emitter<T>) -> StreamResult<Teardown> {
        let on_next = emitter.clone();
        let handle = self.listen(forward_terminals(&emitter).on_next(move |v| on_next.next(v)))?;
        Ok(handle.into())
    }

    /// Run `f` for every value. Resolves when the stream completes, or with
    /// the first error from the stream or from `f`. A failing `f` cancels
    /// the subscription. The future settles only after cleanup has run.
    /// Dropping the future before it settles cancels the subscription.
    pub fn for_each<F>(&self, f: F) -> BoxFuture<'static, StreamResult<()>>
    where
        F: Fn(T) -> StreamResult<()> + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel::<StreamResult<()>>();
        let outcome: Arc<Mutex<Option<StreamResult<()>>>> = Arc::new(Mutex::new(None));
        let handle_slot: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));

        let next_outcome = Arc::clone(&outcome);
        let next_slot = Arc::clone(&handle_slot);
        let error_outcome = Arc::clone(&outcome);
        let complete_outcome = Arc::clone(&outcome);
        let settle_outcome = Arc::clone(&outcome);

        let observer = Observer::new()
            .on_next(move |value| {
                if let Err(e) = f(value) {
                    next_outcome.lock().get_or_insert(Err(e));
                    let handle = next_slot.lock().take();
                    if let Some(handle) = handle {
                        handle.cancel()?;
                    }
                }
                Ok(())
            })
            .on_error(move |e| {
                error_outcome.lock().get_or_insert(Err(e));
                Ok(())
            })
            .on_complete(move || {
                complete_outcome.lock().get_or_insert(Ok(()));
                Ok(())
            })
            .after_cleanup(move || {
                let settled = settle_outcome.lock().take();
                if let Some(result) = settled {
                    let _ = tx.send(result);
                }
            });

        {
            let _turn = scheduler::enter_turn();
            match self.listen(observer) {
                Ok(handle) => {
                    *handle_slot.lock() = Some(handle);
                    // `f` may already have failed on a value pushed from another thread,
                    // before the handle was stored.
                    let failed = matches!(*outcome.lock(), Some(Err(_)));
                    let handle = if failed { handle_slot.lock().take() } else { None };
                    if let Some(handle) = handle {
                        if let Err(e) = handle.cancel() {
                            self.factory.report(&e);
                        }
                    }
                }
                Err(e) => return future::ready(Err(e)).boxed(),
            }
        }

        ForEach {
            rx,
            handle: handle_slot,
            factory: self.factory.clone(),
        }
        .boxed()
    }

    /// Convert into the push-to-pull adaptor
    pub fn pull(&self) -> StreamResult<PullIter<T>> {
        PullIter::new(self)
    }

    pub fn map<U, F>(&self, f: F) -> EventStream<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like `map`, but an `Err` from `f` becomes the output stream's error
    pub fn try_map<U, F>(&self, f: F) -> EventStream<U>
    where
        U: Send + 'static,
        F: Fn(T) -> StreamResult<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        self.factory.create(move |emitter: Emitter<U>| {
            let f = Arc::clone(&f);
            let on_next = emitter.clone();
            let handle = source.listen(forward_terminals(&emitter).on_next(move |value| {
                match f(value) {
                    Ok(mapped) => on_next.next(mapped),
                    Err(e) => on_next.error(e),
                }
            }))?;
            Ok(handle.into())
        })
    }

    pub fn filter<F>(&self, f: F) -> EventStream<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.try_filter(move |value| Ok(f(value)))
    }

    /// Like `filter`, but an `Err` from `f` becomes the output stream's error
    pub fn try_filter<F>(&self, f: F) -> EventStream<T>
    where
        F: Fn(&T) -> StreamResult<bool> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        self.factory.create(move |emitter: Emitter<T>| {
            let f = Arc::clone(&f);
            let on_next = emitter.clone();
            let handle = source.listen(forward_terminals(&emitter).on_next(move |value| {
                match f(&value) {
                    Ok(true) => on_next.next(value),
                    Ok(false) => Ok(()),
                    Err(e) => on_next.error(e),
                }
            }))?;
            Ok(handle.into())
        })
    }
}

/// Future returned by `for_each`; owns the subscription until it settles
struct ForEach {
    rx: oneshot::Receiver<StreamResult<()>>,
    handle: Arc<Mutex<Option<CancelHandle>>>,
    factory: StreamFactory,
}

impl Future for ForEach {
    type Output = StreamResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let settled = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(outcome) => outcome.unwrap_or(Err(StreamError::Cancelled)),
            Poll::Pending => return Poll::Pending,
        };
        self.handle.lock().take();
        Poll::Ready(settled)
    }
}

impl Drop for ForEach {
    fn drop(&mut self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            log::debug!("[{}] for_each dropped before settling", self.factory.name());
            if let Err(e) = handle.cancel() {
                self.factory.report(&e);
            }
        }
    }
}
