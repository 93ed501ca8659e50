//! Stream constructors: of, from, empty
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::core::EventStream;
use super::factory::StreamFactory;
use crate::error::StreamResult;
use crate::subscription::{Emitter, Teardown};

/// Anything `from` can turn into an event stream
pub trait IntoEventStream<T> {
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<T>;
}

/// A foreign push source with a listen-shaped method
pub trait Listenable<T>: Send + Sync + 'static {
    fn listen(&self, emitter: Emitter<T>) -> StreamResult<Teardown>;
}

/// Adapts a [`Listenable`] for `from`
#[derive(Debug, Clone)]
pub struct Foreign<L>(pub L);

/// Adapts a re-iterable collection for `from`. Each subscription iterates a
/// fresh clone.
#[derive(Debug, Clone)]
pub struct Iterable<I>(pub I);

impl<T: Send + 'static> IntoEventStream<T> for EventStream<T> {
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<T> {
        if self.factory().same_as(factory) {
            return self;
        }
        factory.create(move |emitter: Emitter<T>| self.forward_into(emitter))
    }
}

impl<T, L> IntoEventStream<T> for Foreign<L>
where
    T: Send + 'static,
    L: Listenable<T>,
{
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<T> {
        let source = Arc::new(self.0);
        factory.create(move |emitter: Emitter<T>| source.listen(emitter))
    }
}

impl<I> IntoEventStream<I::Item> for Iterable<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::Item: Send + 'static,
{
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<I::Item> {
        factory.iterate(self.0)
    }
}

impl<T> IntoEventStream<T> for Vec<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<T> {
        factory.iterate(self)
    }
}

impl<T, const N: usize> IntoEventStream<T> for [T; N]
where
    T: Clone + Send + Sync + 'static,
{
    fn into_event_stream(self, factory: &StreamFactory) -> EventStream<T> {
        factory.iterate(self)
    }
}

impl StreamFactory {
    /// A stream delivering `items` in a deferred task, then completing
    pub fn of<T, I>(&self, items: I) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
    {
        self.iterate(items.into_iter().collect::<Vec<_>>())
    }

    /// Convert `source` into a stream of this factory. A stream already built
    /// by this factory is returned unchanged.
    pub fn from<T, S>(&self, source: S) -> EventStream<T>
    where
        S: IntoEventStream<T>,
    {
        source.into_event_stream(self)
    }

    /// A stream that completes without emitting, in a deferred task
    pub fn empty<T>(&self) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.iterate(Vec::new())
    }

    /// Enumerate `items` in a deferred task, stopping early once the
    /// subscription is cancelled.
    pub(crate) fn iterate<I>(&self, items: I) -> EventStream<I::Item>
    where
        I: IntoIterator + Clone + Send + Sync + 'static,
        I::Item: Send + 'static,
    {
        let factory = self.clone();
        self.create(move |emitter: Emitter<I::Item>| {
            let closed = Arc::new(AtomicBool::new(false));
            let task_closed = Arc::clone(&closed);
            let items = items.clone();

            factory.defer(Box::new(move || {
                if task_closed.load(Ordering::Acquire) {
                    return Ok(());
                }
                for item in items {
                    emitter.next(item)?;
                    if task_closed.load(Ordering::Acquire) {
                        return Ok(());
                    }
                }
                emitter.complete()
            }));

            Ok(Teardown::new(move || {
                closed.store(true, Ordering::Release);
                Ok(())
            }))
        })
    }
}

impl<T> EventStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `StreamFactory::of` on the global factory
    pub fn of<I>(items: I) -> EventStream<T>
    where
        I: IntoIterator<Item = T>,
    {
        StreamFactory::global().of(items)
    }

    /// `StreamFactory::empty` on the global factory
    pub fn empty() -> EventStream<T> {
        StreamFactory::global().empty()
    }
}

impl<T: Send + 'static> EventStream<T> {
    /// `StreamFactory::from` on the global factory
    pub fn from<S>(source: S) -> EventStream<T>
    where
        S: IntoEventStream<T>,
    {
        StreamFactory::global().from(source)
    }
}
