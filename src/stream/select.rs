//! Fan-in combinators: merge, combine_latest, zip
//!
//! Each combinator subscribes to all of its sources when its output is
//! listened to, and owns the per-source bookkeeping for that one
//! subscription. Any source error errors the output, whose cleanup then
//! cancels every other source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::constructors::IntoEventStream;
use super::core::EventStream;
use super::factory::StreamFactory;
use crate::error::StreamResult;
use crate::subscription::{CancelHandle, Emitter, Observer, Teardown};

/// `StreamFactory::merge` on the global factory
pub fn merge<T, S, I>(sources: I) -> EventStream<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = S>,
    S: IntoEventStream<T>,
{
    StreamFactory::global().merge(sources)
}

/// `StreamFactory::combine_latest` on the global factory
pub fn combine_latest<T, S, I>(sources: I) -> EventStream<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = S>,
    S: IntoEventStream<T>,
{
    StreamFactory::global().combine_latest(sources)
}

/// `StreamFactory::zip` on the global factory
pub fn zip<T, S, I>(sources: I) -> EventStream<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = S>,
    S: IntoEventStream<T>,
{
    StreamFactory::global().zip(sources)
}

/// Subscribe `observe(index)` to every source. If one subscription fails,
/// the ones already started are cancelled before the error is returned.
fn listen_all<T, F>(sources: &[EventStream<T>], mut observe: F) -> StreamResult<Teardown>
where
    T: Send + 'static,
    F: FnMut(usize) -> Observer<T>,
{
    let mut handles: Vec<CancelHandle> = Vec::with_capacity(sources.len());
    for (index, source) in sources.iter().enumerate() {
        match source.listen(observe(index)) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                Teardown::from(handles).run()?;
                return Err(e);
            }
        }
    }
    Ok(Teardown::from(handles))
}

/// Completion callback that completes `emitter` once every source has completed
fn count_down<T: Send + 'static>(
    remaining: &Arc<AtomicUsize>,
    emitter: &Emitter<T>,
    label: &'static str,
) -> impl Fn() -> StreamResult<()> + Send + Sync + 'static {
    let remaining = Arc::clone(remaining);
    let emitter = emitter.clone();
    move || {
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::debug!("{}: all sources completed", label);
            emitter.complete()
        } else {
            Ok(())
        }
    }
}

struct ZipSlot<T> {
    queue: VecDeque<T>,
    done: bool,
}

impl<T> ZipSlot<T> {
    fn exhausted(&self) -> bool {
        self.done && self.queue.is_empty()
    }
}

impl StreamFactory {
    fn collect_sources<T, S, I>(&self, sources: I) -> Arc<Vec<EventStream<T>>>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        Arc::new(sources.into_iter().map(|source| self.from(source)).collect())
    }

    /// Every value of every source, in arrival order. Completes when all
    /// sources have completed; with no sources, completes without emitting.
    pub fn merge<T, S, I>(&self, sources: I) -> EventStream<T>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let sources = self.collect_sources(sources);
        if sources.is_empty() {
            return self.empty();
        }

        self.create(move |emitter: Emitter<T>| {
            let remaining = Arc::new(AtomicUsize::new(sources.len()));
            listen_all(&sources, |_| {
                let on_next = emitter.clone();
                let on_error = emitter.clone();
                Observer::new()
                    .on_next(move |value| on_next.next(value))
                    .on_error(move |e| on_error.error(e))
                    .on_complete(count_down(&remaining, &emitter, "merge"))
            })
        })
    }

    /// Once every source has emitted at least once, a snapshot of each
    /// source's latest value, in source order, for every value that arrives.
    pub fn combine_latest<T, S, I>(&self, sources: I) -> EventStream<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let sources = self.collect_sources(sources);
        if sources.is_empty() {
            return self.empty();
        }

        self.create(move |emitter: Emitter<Vec<T>>| {
            let remaining = Arc::new(AtomicUsize::new(sources.len()));
            let latest: Arc<Mutex<Vec<Option<T>>>> =
                Arc::new(Mutex::new(vec![None; sources.len()]));

            listen_all(&sources, |index| {
                let latest = Arc::clone(&latest);
                let on_next = emitter.clone();
                let on_error = emitter.clone();
                Observer::new()
                    .on_next(move |value| {
                        let snapshot = {
                            let mut latest = latest.lock();
                            latest[index] = Some(value);
                            // None until every source has been seen.
                            latest.iter().cloned().collect::<Option<Vec<T>>>()
                        };
                        match snapshot {
                            Some(snapshot) => on_next.next(snapshot),
                            None => Ok(()),
                        }
                    })
                    .on_error(move |e| on_error.error(e))
                    .on_complete(count_down(&remaining, &emitter, "combine_latest"))
            })
        })
    }

    /// Tuples of the n-th value of every source, in source order. Completes
    /// as soon as some completed source has no buffered values left.
    pub fn zip<T, S, I>(&self, sources: I) -> EventStream<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let sources = self.collect_sources(sources);
        if sources.is_empty() {
            return self.empty();
        }

        self.create(move |emitter: Emitter<Vec<T>>| {
            let slots: Arc<Mutex<Vec<ZipSlot<T>>>> = Arc::new(Mutex::new(
                (0..sources.len())
                    .map(|_| ZipSlot {
                        queue: VecDeque::new(),
                        done: false,
                    })
                    .collect(),
            ));

            listen_all(&sources, |index| {
                let next_slots = Arc::clone(&slots);
                let complete_slots = Arc::clone(&slots);
                let on_next = emitter.clone();
                let on_error = emitter.clone();
                let on_complete = emitter.clone();
                Observer::new()
                    .on_next(move |value| {
                        let tuple = {
                            let mut slots = next_slots.lock();
                            slots[index].queue.push_back(value);
                            if slots.iter().all(|slot| !slot.queue.is_empty()) {
                                slots.iter_mut().map(|slot| slot.queue.pop_front()).collect()
                            } else {
                                None
                            }
                        };
                        let Some(tuple) = tuple else {
                            return Ok(());
                        };
                        let delivered = on_next.next(tuple);
                        let completed = zip_complete_if_exhausted(&next_slots, &on_next);
                        delivered.and(completed)
                    })
                    .on_error(move |e| on_error.error(e))
                    .on_complete(move || {
                        complete_slots.lock()[index].done = true;
                        zip_complete_if_exhausted(&complete_slots, &on_complete)
                    })
            })
        })
    }
}

fn zip_complete_if_exhausted<T: Send + 'static>(
    slots: &Arc<Mutex<Vec<ZipSlot<T>>>>,
    emitter: &Emitter<Vec<T>>,
) -> StreamResult<()> {
    let exhausted = slots.lock().iter().any(ZipSlot::exhausted);
    if exhausted {
        log::debug!("zip: a completed source has no buffered values left");
        emitter.complete()
    } else {
        Ok(())
    }
}
