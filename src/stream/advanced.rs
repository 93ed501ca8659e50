//! Aggregating and composing operators: reduce/fold, concat, flat_map
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::constructors::IntoEventStream;
use super::core::{forward_terminals, EventStream};
use crate::error::{StreamError, StreamResult};
use crate::scheduler;
use crate::subscription::{CancelHandle, Emitter, Observer, Teardown};

impl<T: Send + 'static> EventStream<T> {
    /// Combine all values pairwise, the first value seeding the accumulator.
    /// Emits the result once, then completes. An empty sequence fails with
    /// a `Type` error.
    pub fn reduce<F>(&self, f: F) -> EventStream<T>
    where
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.try_reduce(move |acc, value| Ok(f(acc, value)))
    }

    pub fn try_reduce<F>(&self, f: F) -> EventStream<T>
    where
        F: Fn(T, T) -> StreamResult<T> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        self.factory().create(move |emitter: Emitter<T>| {
            let f = Arc::clone(&f);
            let acc: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
            let next_acc = Arc::clone(&acc);
            let on_next = emitter.clone();
            let on_complete = emitter.clone();

            let observer = forward_terminals(&emitter)
                .on_next(move |value| {
                    let current = next_acc.lock().take();
                    let updated = match current {
                        Some(current) => match f(current, value) {
                            Ok(updated) => updated,
                            Err(e) => return on_next.error(e),
                        },
                        None => value,
                    };
                    *next_acc.lock() = Some(updated);
                    Ok(())
                })
                .on_complete(move || {
                    let result = acc.lock().take();
                    match result {
                        Some(result) => {
                            on_complete.next(result)?;
                            on_complete.complete()
                        }
                        None => on_complete.error(StreamError::empty_reduce()),
                    }
                });

            Ok(source.listen(observer)?.into())
        })
    }

    /// Accumulate from `seed`. Emits the result once, then completes; an
    /// empty sequence emits the seed.
    pub fn fold<A, F>(&self, seed: A, f: F) -> EventStream<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        self.try_fold(seed, move |acc, value| Ok(f(acc, value)))
    }

    pub fn try_fold<A, F>(&self, seed: A, f: F) -> EventStream<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> StreamResult<A> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        self.factory().create(move |emitter: Emitter<A>| {
            let f = Arc::clone(&f);
            // Each subscription accumulates from its own copy of the seed.
            let acc = Arc::new(Mutex::new(Some(seed.clone())));
            let next_acc = Arc::clone(&acc);
            let on_next = emitter.clone();
            let on_complete = emitter.clone();

            let observer = forward_terminals(&emitter)
                .on_next(move |value| {
                    let current = next_acc.lock().take();
                    let Some(current) = current else {
                        return Ok(());
                    };
                    match f(current, value) {
                        Ok(updated) => {
                            *next_acc.lock() = Some(updated);
                            Ok(())
                        }
                        Err(e) => on_next.error(e),
                    }
                })
                .on_complete(move || {
                    let result = acc.lock().take();
                    if let Some(result) = result {
                        on_complete.next(result)?;
                    }
                    on_complete.complete()
                });

            Ok(source.listen(observer)?.into())
        })
    }

    /// This stream, then each of `sources` in order. Each source starts only
    /// after the previous one completed; only one is subscribed at a time.
    pub fn concat<S, I>(&self, sources: I) -> EventStream<T>
    where
        I: IntoIterator<Item = S>,
        S: IntoEventStream<T>,
    {
        let factory = self.factory().clone();
        let chain: Arc<Vec<EventStream<T>>> = Arc::new(
            std::iter::once(self.clone())
                .chain(sources.into_iter().map(|source| factory.from(source)))
                .collect(),
        );

        self.factory().create(move |emitter: Emitter<T>| {
            let active: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
            start_chain(0, Arc::clone(&chain), emitter, Arc::clone(&active))?;
            Ok(Teardown::new(move || {
                let handle = active.lock().take();
                match handle {
                    Some(handle) => handle.cancel(),
                    None => Ok(()),
                }
            }))
        })
    }

    /// Subscribe to the stream `f` returns for every value. Inner streams run
    /// concurrently; the output completes once this stream and every inner
    /// stream have completed.
    pub fn flat_map<U, S, F>(&self, f: F) -> EventStream<U>
    where
        U: Send + 'static,
        S: IntoEventStream<U>,
        F: Fn(T) -> S + Send + Sync + 'static,
    {
        self.try_flat_map(move |value| Ok(f(value)))
    }

    /// Like `flat_map`, but an `Err` from `f` becomes the output stream's error
    pub fn try_flat_map<U, S, F>(&self, f: F) -> EventStream<U>
    where
        U: Send + 'static,
        S: IntoEventStream<U>,
        F: Fn(T) -> StreamResult<S> + Send + Sync + 'static,
    {
        let source = self.clone();
        let f = Arc::new(f);
        self.factory().create(move |emitter: Emitter<U>| {
            let state = Arc::new(Mutex::new(FlatMapState::default()));
            let f = Arc::clone(&f);
            let factory = source.factory().clone();
            let on_next = emitter.clone();
            let on_complete = emitter.clone();
            let next_state = Arc::clone(&state);
            let complete_state = Arc::clone(&state);

            let observer = Observer::new()
                .on_next(move |value| {
                    let inner = match f(value) {
                        Ok(inner) => factory.from(inner),
                        Err(e) => return on_next.error(e),
                    };
                    start_inner(&inner, &next_state, &on_next)
                })
                .on_error({
                    let emitter = emitter.clone();
                    move |e| emitter.error(e)
                })
                .on_complete(move || {
                    complete_state.lock().outer_complete = true;
                    complete_if_done(&complete_state, &on_complete)
                });

            let outer = source.listen(observer)?;
            state.lock().outer = Some(outer);

            Ok(Teardown::new(move || {
                let (inners, outer) = {
                    let mut state = state.lock();
                    let inners: Vec<CancelHandle> =
                        state.inners.drain().filter_map(|(_, handle)| handle).collect();
                    (inners, state.outer.take())
                };
                let mut handles = inners;
                handles.extend(outer);
                Teardown::from(handles).run()
            }))
        })
    }

    /// Subscribe to every inner stream concurrently
    pub fn flatten<U>(&self) -> EventStream<U>
    where
        T: IntoEventStream<U>,
        U: Send + 'static,
    {
        self.flat_map(|inner| inner)
    }
}

fn start_chain<T: Send + 'static>(
    index: usize,
    chain: Arc<Vec<EventStream<T>>>,
    emitter: Emitter<T>,
    active: Arc<Mutex<Option<CancelHandle>>>,
) -> StreamResult<()> {
    let source = chain[index].clone();
    let on_next = emitter.clone();
    let on_error = emitter.clone();
    let complete_active = Arc::clone(&active);
    let complete_emitter = emitter.clone();

    let observer = Observer::new()
        .on_next(move |value| on_next.next(value))
        .on_error(move |e| on_error.error(e))
        .on_complete(move || {
            if index + 1 == chain.len() {
                complete_active.lock().take();
                complete_emitter.complete()
            } else {
                let started = start_chain(
                    index + 1,
                    Arc::clone(&chain),
                    complete_emitter.clone(),
                    Arc::clone(&complete_active),
                );
                match started {
                    Ok(()) => Ok(()),
                    Err(e) => complete_emitter.error(e),
                }
            }
        });

    let _turn = scheduler::enter_turn();
    let handle = source.listen(observer)?;
    *active.lock() = Some(handle.clone());
    // Output cancelled while this source was starting.
    if emitter.is_closed() {
        active.lock().take();
        handle.cancel()?;
    }
    Ok(())
}

#[derive(Default)]
struct FlatMapState {
    outer: Option<CancelHandle>,
    outer_complete: bool,
    next_key: u64,
    // A key is reserved before the inner subscribes, so an inner that
    // completes before its handle is stored is still accounted for.
    inners: HashMap<u64, Option<CancelHandle>>,
}

fn start_inner<U: Send + 'static>(
    inner: &EventStream<U>,
    state: &Arc<Mutex<FlatMapState>>,
    emitter: &Emitter<U>,
) -> StreamResult<()> {
    let key = {
        let mut state = state.lock();
        let key = state.next_key;
        state.next_key += 1;
        state.inners.insert(key, None);
        key
    };

    let on_next = emitter.clone();
    let on_error = emitter.clone();
    let on_complete = emitter.clone();
    let complete_state = Arc::clone(state);
    let observer = Observer::new()
        .on_next(move |value| on_next.next(value))
        .on_error(move |e| on_error.error(e))
        .on_complete(move || {
            complete_state.lock().inners.remove(&key);
            complete_if_done(&complete_state, &on_complete)
        });

    let _turn = scheduler::enter_turn();
    let handle = match inner.listen(observer) {
        Ok(handle) => handle,
        Err(e) => {
            state.lock().inners.remove(&key);
            return emitter.error(e);
        }
    };
    if let Some(slot) = state.lock().inners.get_mut(&key) {
        *slot = Some(handle.clone());
    }
    if emitter.is_closed() {
        handle.cancel()?;
    }
    Ok(())
}

fn complete_if_done<U: Send + 'static>(
    state: &Arc<Mutex<FlatMapState>>,
    emitter: &Emitter<U>,
) -> StreamResult<()> {
    let done = {
        let state = state.lock();
        state.outer_complete && state.inners.is_empty()
    };
    if done {
        log::debug!("flat_map: outer and all inner streams completed");
        emitter.complete()
    } else {
        Ok(())
    }
}
