//! Per-listen subscription state machine
//!
//! A subscription moves `Initializing -> Ready -> Closed`. While the producer
//! function runs it is `Initializing` and every delivery fails with
//! [`StreamError::InvalidState`]. Terminal deliveries close the subscription
//! *before* the consumer callback runs, so a callback that re-enters the
//! subscription sees it closed. Cleanup runs at most once, after the
//! triggering callback has returned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StreamError, StreamResult};

type NextFn<T> = Arc<dyn Fn(T) -> StreamResult<()> + Send + Sync>;
type ErrorFn = Arc<dyn Fn(StreamError) -> StreamResult<()> + Send + Sync>;
type CompleteFn = Arc<dyn Fn() -> StreamResult<()> + Send + Sync>;
type AfterCleanup = Box<dyn FnOnce() + Send>;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Initializing,
    Ready,
    Closed,
}

/// Consumer callbacks for one `listen` call. Every callback is optional.
///
/// A callback returning `Err` hands that error back to whoever triggered the
/// delivery, after cleanup has run for terminal deliveries.
pub struct Observer<T> {
    on_next: Option<NextFn<T>>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
    after_cleanup: Option<AfterCleanup>,
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self {
            on_next: None,
            on_error: None,
            on_complete: None,
            after_cleanup: None,
        }
    }
}

impl<T> Observer<T> {
    /// An observer that ignores values and completion. Errors delivered to
    /// it are handed back to the producer.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(T) -> StreamResult<()> + Send + Sync + 'static,
    {
        self.on_next = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(StreamError) -> StreamResult<()> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() -> StreamResult<()> + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Runs once the subscription has closed and its cleanup has finished.
    pub(crate) fn after_cleanup<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.after_cleanup = Some(Box::new(f));
        self
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("on_next", &self.on_next.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Resource release returned by a producer, run once when the subscription closes
#[must_use = "a teardown does nothing unless returned from a producer"]
pub struct Teardown(Option<Box<dyn FnOnce() -> StreamResult<()> + Send>>);

impl Teardown {
    /// No cleanup
    pub fn none() -> Self {
        Teardown(None)
    }

    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> StreamResult<()> + Send + 'static,
    {
        Teardown(Some(Box::new(f)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn run(self) -> StreamResult<()> {
        match self.0 {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl Default for Teardown {
    fn default() -> Self {
        Teardown::none()
    }
}

impl From<CancelHandle> for Teardown {
    fn from(handle: CancelHandle) -> Self {
        Teardown::new(move || handle.cancel())
    }
}

/// Cancels every handle; the first cleanup error wins.
impl From<Vec<CancelHandle>> for Teardown {
    fn from(handles: Vec<CancelHandle>) -> Self {
        Teardown::new(move || {
            let mut result = Ok(());
            for handle in handles {
                if let Err(e) = handle.cancel() {
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
            result
        })
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() { "Teardown(Some)" } else { "Teardown(None)" })
    }
}

struct Inner<T> {
    state: SubscriptionState,
    on_next: Option<NextFn<T>>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
    cleanup: Option<Teardown>,
    after_cleanup: Option<AfterCleanup>,
}

impl<T> Inner<T> {
    fn close(&mut self) {
        self.state = SubscriptionState::Closed;
        self.on_next = None;
        self.on_error = None;
        self.on_complete = None;
    }
}

pub(crate) struct Subscription<T> {
    id: u64,
    inner: Mutex<Inner<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(observer: Observer<T>) -> Arc<Self> {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("subscription {} initializing", id);
        Arc::new(Self {
            id,
            inner: Mutex::new(Inner {
                state: SubscriptionState::Initializing,
                on_next: observer.on_next,
                on_error: observer.on_error,
                on_complete: observer.on_complete,
                cleanup: None,
                after_cleanup: observer.after_cleanup,
            }),
        })
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    /// Record the producer's cleanup and become ready.
    pub(crate) fn start(&self, cleanup: Teardown) -> StreamResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != SubscriptionState::Closed {
                inner.cleanup = Some(cleanup);
                inner.state = SubscriptionState::Ready;
                log::trace!("subscription {} ready", self.id);
                return Ok(());
            }
        }
        cleanup.run()
    }

    pub(crate) fn send_next(&self, value: T) -> StreamResult<()> {
        let handler = {
            let inner = self.inner.lock();
            match inner.state {
                SubscriptionState::Closed => return Ok(()),
                SubscriptionState::Initializing => return Err(StreamError::not_ready()),
                SubscriptionState::Ready => inner.on_next.clone(),
            }
        };
        let completion = match handler {
            Some(on_next) => on_next(value),
            None => Ok(()),
        };
        // The handler may have completed or cancelled us re-entrantly.
        if self.state() == SubscriptionState::Closed {
            self.finalize()?;
        }
        completion
    }

    pub(crate) fn send_error(&self, error: StreamError) -> StreamResult<()> {
        let handler = {
            let mut inner = self.inner.lock();
            match inner.state {
                SubscriptionState::Closed => return Ok(()),
                SubscriptionState::Initializing => return Err(StreamError::not_ready()),
                SubscriptionState::Ready => {
                    let on_error = inner.on_error.clone();
                    inner.close();
                    on_error
                }
            }
        };
        log::trace!("subscription {} closed by error: {}", self.id, error);
        let completion = match handler {
            Some(on_error) => on_error(error),
            None => Err(error),
        };
        self.finalize()?;
        completion
    }

    pub(crate) fn send_complete(&self) -> StreamResult<()> {
        let handler = {
            let mut inner = self.inner.lock();
            match inner.state {
                SubscriptionState::Closed => return Ok(()),
                SubscriptionState::Initializing => return Err(StreamError::not_ready()),
                SubscriptionState::Ready => {
                    let on_complete = inner.on_complete.clone();
                    inner.close();
                    on_complete
                }
            }
        };
        log::trace!("subscription {} completed", self.id);
        let completion = match handler {
            Some(on_complete) => on_complete(),
            None => Ok(()),
        };
        self.finalize()?;
        completion
    }

    pub(crate) fn cancel(&self) -> StreamResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == SubscriptionState::Closed {
                return Ok(());
            }
            inner.close();
        }
        log::trace!("subscription {} cancelled", self.id);
        self.finalize()
    }

    fn finalize(&self) -> StreamResult<()> {
        let (cleanup, after_cleanup) = {
            let mut inner = self.inner.lock();
            (inner.cleanup.take(), inner.after_cleanup.take())
        };
        let result = match cleanup {
            Some(cleanup) => {
                log::trace!("subscription {} running cleanup", self.id);
                cleanup.run()
            }
            None => Ok(()),
        };
        if let Some(after_cleanup) = after_cleanup {
            after_cleanup();
        }
        result
    }
}

/// Delivery functions handed to a producer, bound to one subscription
pub struct Emitter<T> {
    subscription: Arc<Subscription<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            subscription: Arc::clone(&self.subscription),
        }
    }
}

impl<T> Emitter<T> {
    pub(crate) fn new(subscription: Arc<Subscription<T>>) -> Self {
        Self { subscription }
    }

    /// Deliver a value. Returns whatever the consumer's callback returned.
    pub fn next(&self, value: T) -> StreamResult<()> {
        self.subscription.send_next(value)
    }

    /// Terminate with an error. With no error callback registered the error
    /// comes back to the caller.
    pub fn error(&self, error: StreamError) -> StreamResult<()> {
        self.subscription.send_error(error)
    }

    /// Terminate normally.
    pub fn complete(&self) -> StreamResult<()> {
        self.subscription.send_complete()
    }

    /// Whether the subscription has terminated or been cancelled
    pub fn is_closed(&self) -> bool {
        self.subscription.state() == SubscriptionState::Closed
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscription", &self.subscription.id)
            .finish()
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> StreamResult<()>;
    fn state(&self) -> SubscriptionState;
    fn id(&self) -> u64;
}

impl<T> Cancel for Subscription<T> {
    fn cancel(&self) -> StreamResult<()> {
        Subscription::cancel(self)
    }

    fn state(&self) -> SubscriptionState {
        Subscription::state(self)
    }

    fn id(&self) -> u64 {
        self.id
    }
}

/// Cancels one subscription. Dropping the handle does not cancel.
#[derive(Clone)]
pub struct CancelHandle {
    subscription: Arc<dyn Cancel>,
}

impl CancelHandle {
    pub(crate) fn new<T: 'static>(subscription: Arc<Subscription<T>>) -> Self {
        Self { subscription }
    }

    /// Close the subscription and run its cleanup without invoking any
    /// consumer callback. Idempotent; an error from the cleanup is returned.
    pub fn cancel(&self) -> StreamResult<()> {
        self.subscription.cancel()
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.state() == SubscriptionState::Closed
    }

    pub fn state(&self) -> SubscriptionState {
        self.subscription.state()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("subscription", &self.subscription.id())
            .field("state", &self.subscription.state())
            .finish()
    }
}
