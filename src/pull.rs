//! Push-to-pull adaptor
//!
//! Turns an event stream into a sequence of pull requests. Each request
//! resolves to exactly one outcome and requests resolve strictly in the
//! order they were issued. Pushed events that arrive with no request
//! waiting are buffered; requests issued with no event available wait
//! behind the current one.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::error::{StreamError, StreamResult};
use crate::scheduler;
use crate::stream::{EventStream, StreamFactory};
use crate::subscription::{CancelHandle, Observer};

/// Outcome of a successful pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// A value; more may follow
    Item(T),
    /// The stream is finished, by completion or early close
    Done,
}

impl<T> Step<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Step::Done)
    }

    pub fn into_item(self) -> Option<T> {
        match self {
            Step::Item(value) => Some(value),
            Step::Done => None,
        }
    }
}

enum Event<T> {
    Next(T),
    Error(StreamError),
    Complete,
}

enum RequestKind {
    Next,
    Throw(StreamError),
    Return,
}

type Reply<T> = oneshot::Sender<StreamResult<Step<T>>>;

struct Request<T> {
    kind: RequestKind,
    reply: Reply<T>,
}

/// Side effects collected under the adaptor lock and applied after it is
/// released: the subscription is cancelled first, then replies are sent in order.
struct Effects<T> {
    cancel: Option<CancelHandle>,
    replies: Vec<(Reply<T>, StreamResult<Step<T>>)>,
}

impl<T> Default for Effects<T> {
    fn default() -> Self {
        Self {
            cancel: None,
            replies: Vec::new(),
        }
    }
}

impl<T> Effects<T> {
    fn reply(&mut self, reply: Reply<T>, outcome: StreamResult<Step<T>>) {
        self.replies.push((reply, outcome));
    }

    fn flush(&mut self, request: Request<T>) {
        let outcome = match request.kind {
            RequestKind::Throw(e) => Err(e),
            RequestKind::Next | RequestKind::Return => Ok(Step::Done),
        };
        self.reply(request.reply, outcome);
    }

    fn apply(self, factory: &StreamFactory) {
        if let Some(handle) = self.cancel {
            if let Err(e) = handle.cancel() {
                log::warn!("[{}] cleanup failed while closing pull adaptor: {}", factory.name(), e);
                factory.report(&e);
            }
        }
        for (reply, outcome) in self.replies {
            // The caller may have dropped the pull future.
            let _ = reply.send(outcome);
        }
    }
}

struct Adaptor<T> {
    current: Option<Request<T>>,
    requests: VecDeque<Request<T>>,
    events: VecDeque<Event<T>>,
    done: bool,
    cancel: Option<CancelHandle>,
}

impl<T> Adaptor<T> {
    fn new() -> Self {
        Self {
            current: None,
            requests: VecDeque::new(),
            events: VecDeque::new(),
            done: false,
            cancel: None,
        }
    }

    fn receive(&mut self, event: Event<T>, fx: &mut Effects<T>) {
        if self.done {
            return;
        }
        self.skip_abandoned(fx);
        if self.current.is_some() {
            self.resolve_current(event, fx);
        } else {
            self.events.push_back(event);
        }
    }

    /// Drop `next` requests whose `Pull` future is gone so an event is never
    /// handed to a dead reply.
    fn skip_abandoned(&mut self, fx: &mut Effects<T>) {
        while self
            .current
            .as_ref()
            .map_or(false, |request| request.reply.is_canceled())
        {
            self.current = None;
            match self.requests.pop_front() {
                Some(next) => self.set_current(next, fx),
                None => break,
            }
        }
    }

    fn resolve_current(&mut self, event: Event<T>, fx: &mut Effects<T>) {
        let Some(request) = self.current.take() else {
            return;
        };
        match event {
            Event::Next(value) => {
                fx.reply(request.reply, Ok(Step::Item(value)));
                if let Some(next) = self.requests.pop_front() {
                    self.set_current(next, fx);
                }
            }
            Event::Error(e) => {
                fx.reply(request.reply, Err(e));
                self.finalize(fx);
            }
            Event::Complete => {
                fx.reply(request.reply, Ok(Step::Done));
                self.finalize(fx);
            }
        }
    }

    fn set_current(&mut self, request: Request<T>, fx: &mut Effects<T>) {
        match request.kind {
            RequestKind::Next => self.current = Some(request),
            RequestKind::Throw(_) | RequestKind::Return => {
                fx.flush(request);
                self.finalize(fx);
            }
        }
    }

    fn request(&mut self, request: Request<T>, fx: &mut Effects<T>) {
        if self.done {
            fx.flush(request);
            return;
        }
        if self.current.is_some() {
            self.requests.push_back(request);
            return;
        }
        self.set_current(request, fx);
        if !self.done {
            if let Some(event) = self.events.pop_front() {
                self.resolve_current(event, fx);
            }
        }
    }

    /// Flush waiting requests, release every buffer and hand the
    /// subscription over for cancellation. Runs at most once.
    fn finalize(&mut self, fx: &mut Effects<T>) {
        if self.done {
            return;
        }
        while let Some(request) = self.requests.pop_front() {
            fx.flush(request);
        }
        if let Some(request) = self.current.take() {
            fx.flush(request);
        }
        self.done = true;
        self.events = VecDeque::new();
        self.requests = VecDeque::new();
        fx.cancel = self.cancel.take();
        log::debug!("pull adaptor finalized");
    }
}

/// Pull-based view of an event stream
///
/// `next`, `throw` and `close` register their request immediately, in call
/// order, and return a [`Pull`] future for its outcome. `PullIter` is also a
/// `futures_core::Stream` of `StreamResult<T>`. Dropping an unfinished
/// `PullIter` cancels its subscription.
pub struct PullIter<T> {
    shared: Arc<Mutex<Adaptor<T>>>,
    factory: StreamFactory,
    in_flight: Option<Pull<T>>,
    exhausted: bool,
}

impl<T: Send + 'static> PullIter<T> {
    pub(crate) fn new(stream: &EventStream<T>) -> StreamResult<Self> {
        let shared = Arc::new(Mutex::new(Adaptor::new()));
        let factory = stream.factory().clone();

        let observer = Observer::new()
            .on_next(receiver(&shared, &factory, Event::Next))
            .on_error(receiver(&shared, &factory, Event::Error))
            .on_complete({
                let on_complete = receiver(&shared, &factory, |()| Event::Complete);
                move || on_complete(())
            });

        let _turn = scheduler::enter_turn();
        let handle = stream.listen(observer)?;
        shared.lock().cancel = Some(handle);

        Ok(Self {
            shared,
            factory,
            in_flight: None,
            exhausted: false,
        })
    }

    /// Request the next value
    pub fn next(&self) -> Pull<T> {
        self.request(RequestKind::Next)
    }

    /// Close early; the request resolves to `Err(error)`
    pub fn throw(&self, error: StreamError) -> Pull<T> {
        self.request(RequestKind::Throw(error))
    }

    /// Close early; the request resolves to `Step::Done`
    pub fn close(&self) -> Pull<T> {
        self.request(RequestKind::Return)
    }

    /// Whether the adaptor has finalized
    pub fn is_done(&self) -> bool {
        self.shared.lock().done
    }

    fn request(&self, kind: RequestKind) -> Pull<T> {
        let (reply, rx) = oneshot::channel();
        let mut fx = Effects::default();
        self.shared.lock().request(Request { kind, reply }, &mut fx);
        fx.apply(&self.factory);
        Pull { rx }
    }
}

fn receiver<T, A, F>(
    shared: &Arc<Mutex<Adaptor<T>>>,
    factory: &StreamFactory,
    make_event: F,
) -> impl Fn(A) -> StreamResult<()> + Send + Sync + 'static
where
    T: Send + 'static,
    F: Fn(A) -> Event<T> + Send + Sync + 'static,
{
    let shared = Arc::clone(shared);
    let factory = factory.clone();
    move |payload| {
        let mut fx = Effects::default();
        shared.lock().receive(make_event(payload), &mut fx);
        fx.apply(&factory);
        Ok(())
    }
}

impl<T> Drop for PullIter<T> {
    fn drop(&mut self) {
        let mut fx = Effects::default();
        self.shared.lock().finalize(&mut fx);
        fx.apply(&self.factory);
    }
}

impl<T> fmt::Debug for PullIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adaptor = self.shared.lock();
        f.debug_struct("PullIter")
            .field("buffered_events", &adaptor.events.len())
            .field("waiting_requests", &(adaptor.requests.len() + adaptor.current.iter().count()))
            .field("done", &adaptor.done)
            .finish()
    }
}

impl<T: Send + 'static> futures_core::Stream for PullIter<T> {
    type Item = StreamResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.exhausted {
            return Poll::Ready(None);
        }
        let mut pull = match self.in_flight.take() {
            Some(pull) => pull,
            None => self.next(),
        };
        match Pin::new(&mut pull).poll(cx) {
            Poll::Pending => {
                self.in_flight = Some(pull);
                Poll::Pending
            }
            Poll::Ready(Ok(Step::Item(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Ok(Step::Done)) => {
                self.exhausted = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(e)) => {
                self.exhausted = true;
                Poll::Ready(Some(Err(e)))
            }
        }
    }
}

/// Outcome of one pull request
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Pull<T> {
    rx: oneshot::Receiver<StreamResult<Step<T>>>,
}

impl<T> Future for Pull<T> {
    type Output = StreamResult<Step<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped reply only happens once the adaptor is gone: treat as finished.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Ok(Step::Done)))
    }
}

impl<T> fmt::Debug for Pull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pull").finish_non_exhaustive()
    }
}
