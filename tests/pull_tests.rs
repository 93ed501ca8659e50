use eventstream::{
    Emitter, EventStream, MicrotaskQueue, StreamError, StreamFactory, Step, Teardown,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::task::spawn;
use tokio_test::{assert_pending, assert_ready, assert_ready_eq};

struct Source {
    stream: EventStream<i32>,
    slot: Arc<Mutex<Option<Emitter<i32>>>>,
    cleanups: Arc<AtomicUsize>,
}

impl Source {
    fn new() -> Self {
        let slot: Arc<Mutex<Option<Emitter<i32>>>> = Arc::new(Mutex::new(None));
        let cleanups = Arc::new(AtomicUsize::new(0));
        let producer_slot = Arc::clone(&slot);
        let producer_cleanups = Arc::clone(&cleanups);
        let stream = EventStream::new(move |emitter: Emitter<i32>| {
            *producer_slot.lock() = Some(emitter);
            let cleanups = Arc::clone(&producer_cleanups);
            Ok(Teardown::new(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        });
        Self {
            stream,
            slot,
            cleanups,
        }
    }

    fn emitter(&self) -> Emitter<i32> {
        self.slot.lock().clone().expect("subscribed")
    }

    fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_buffered_values_resolve_in_order() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    source.emitter().next(1).unwrap();
    source.emitter().next(2).unwrap();
    source.emitter().complete().unwrap();

    assert_eq!(iter.next().await, Ok(Step::Item(1)));
    assert_eq!(iter.next().await, Ok(Step::Item(2)));
    assert_eq!(iter.next().await, Ok(Step::Done));
    assert!(iter.is_done());
}

#[tokio::test]
async fn test_requests_before_values_resolve_fifo() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let mut first = spawn(iter.next());
    let mut second = spawn(iter.next());
    let mut third = spawn(iter.next());
    assert_pending!(first.poll());
    assert_pending!(second.poll());
    assert_pending!(third.poll());

    source.emitter().next(10).unwrap();
    assert_ready_eq!(first.poll(), Ok(Step::Item(10)));
    assert_pending!(second.poll());

    source.emitter().next(20).unwrap();
    source.emitter().complete().unwrap();
    assert_ready_eq!(second.poll(), Ok(Step::Item(20)));
    assert_ready_eq!(third.poll(), Ok(Step::Done));
}

#[tokio::test]
async fn test_dropped_request_does_not_consume_value() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    drop(iter.next());
    source.emitter().next(1).unwrap();
    source.emitter().next(2).unwrap();

    assert_eq!(iter.next().await, Ok(Step::Item(1)));
    assert_eq!(iter.next().await, Ok(Step::Item(2)));
}

#[tokio::test]
async fn test_dropped_request_in_queue_is_skipped() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let mut first = spawn(iter.next());
    let second = iter.next();
    let mut third = spawn(iter.next());
    assert_pending!(first.poll());
    assert_pending!(third.poll());
    drop(second);

    source.emitter().next(10).unwrap();
    source.emitter().next(20).unwrap();
    assert_ready_eq!(first.poll(), Ok(Step::Item(10)));
    assert_ready_eq!(third.poll(), Ok(Step::Item(20)));
}

#[tokio::test]
async fn test_error_resolves_pending_request_then_done() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let mut pending = spawn(iter.next());
    assert_pending!(pending.poll());
    source
        .emitter()
        .error(StreamError::custom("upstream failed"))
        .unwrap();

    assert_ready_eq!(pending.poll(), Err(StreamError::custom("upstream failed")));
    assert_eq!(iter.next().await, Ok(Step::Done));
    assert_eq!(source.cleanups(), 1);
}

#[tokio::test]
async fn test_buffered_error_after_values() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    source.emitter().next(1).unwrap();
    source.emitter().error(StreamError::custom("late")).unwrap();

    assert_eq!(iter.next().await, Ok(Step::Item(1)));
    assert_eq!(iter.next().await, Err(StreamError::custom("late")));
    assert_eq!(iter.next().await, Ok(Step::Done));
}

#[tokio::test]
async fn test_close_finishes_and_cancels() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();
    source.emitter().next(1).unwrap();

    assert_eq!(iter.close().await, Ok(Step::Done));
    assert!(iter.is_done());
    assert_eq!(source.cleanups(), 1);
    assert!(source.emitter().is_closed());
    // Buffered values are discarded on close.
    assert_eq!(iter.next().await, Ok(Step::Done));
}

#[tokio::test]
async fn test_throw_resolves_with_error_and_cancels() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let err = StreamError::custom("consumer gave up");
    assert_eq!(iter.throw(err.clone()).await, Err(err));
    assert_eq!(source.cleanups(), 1);
    assert_eq!(iter.next().await, Ok(Step::Done));
}

#[tokio::test]
async fn test_throw_waits_behind_pending_next() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let mut next = spawn(iter.next());
    let mut throw = spawn(iter.throw(StreamError::custom("stop")));
    assert_pending!(next.poll());
    assert_pending!(throw.poll());
    assert_eq!(source.cleanups(), 0);

    source.emitter().next(5).unwrap();
    assert_ready_eq!(next.poll(), Ok(Step::Item(5)));
    assert_ready_eq!(throw.poll(), Err(StreamError::custom("stop")));
    assert_eq!(source.cleanups(), 1);
}

#[tokio::test]
async fn test_close_waits_behind_pending_next_until_completion() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();

    let mut next = spawn(iter.next());
    let mut close = spawn(iter.close());
    assert_pending!(next.poll());
    assert_pending!(close.poll());

    source.emitter().complete().unwrap();
    assert_ready_eq!(next.poll(), Ok(Step::Done));
    assert_ready_eq!(close.poll(), Ok(Step::Done));
}

#[tokio::test]
async fn test_drop_cancels_unfinished_adaptor() {
    let source = Source::new();
    let iter = source.stream.pull().unwrap();
    let pending = iter.next();

    drop(iter);
    assert_eq!(source.cleanups(), 1);
    assert!(source.emitter().is_closed());
    // Requests outstanding at drop resolve as finished.
    assert_eq!(pending.await, Ok(Step::Done));
}

#[tokio::test]
async fn test_pull_iter_is_a_futures_stream() {
    let values: Vec<i32> = EventStream::of(vec![3, 1, 4, 1, 5])
        .pull()
        .unwrap()
        .map(|v| v.unwrap())
        .collect()
        .await;
    assert_eq!(values, vec![3, 1, 4, 1, 5]);
}

#[tokio::test]
async fn test_stream_ends_after_error_item() {
    let failing = EventStream::of(vec![1, 2]).concat(vec![EventStream::new(
        |_emitter: Emitter<i32>| Err(StreamError::custom("next source offline")),
    )]);

    let items: Vec<_> = failing.pull().unwrap().collect().await;
    assert_eq!(
        items,
        vec![Ok(1), Ok(2), Err(StreamError::custom("next source offline"))]
    );
}

#[test]
fn test_pull_with_microtask_queue() {
    let queue = MicrotaskQueue::new();
    let factory = StreamFactory::builder()
        .scheduler(Arc::new(queue.clone()))
        .build();
    let iter = factory.of(vec!['a', 'b']).pull().unwrap();

    let mut first = spawn(iter.next());
    assert_pending!(first.poll());

    queue.run_until_idle();
    assert_ready_eq!(first.poll(), Ok(Step::Item('a')));
    let mut second = spawn(iter.next());
    assert_ready_eq!(second.poll(), Ok(Step::Item('b')));
    let mut third = spawn(iter.next());
    let done = assert_ready!(third.poll());
    assert!(done.unwrap().is_done());
}
