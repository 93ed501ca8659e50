use eventstream::{
    Emitter, EventStream, MicrotaskQueue, Observer, StreamError, StreamFactory, Teardown,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_test::{assert_pending, assert_ready, assert_ready_err, assert_ready_ok};

type Log = Arc<Mutex<Vec<String>>>;

fn queue_factory() -> (StreamFactory, MicrotaskQueue) {
    let queue = MicrotaskQueue::new();
    let factory = StreamFactory::builder()
        .name("core-tests")
        .scheduler(Arc::new(queue.clone()))
        .build();
    (factory, queue)
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Stream of i32 driven by hand; cleanup is recorded in `log`
fn manual_stream(log: &Log) -> (EventStream<i32>, Arc<Mutex<Option<Emitter<i32>>>>) {
    let slot: Arc<Mutex<Option<Emitter<i32>>>> = Arc::new(Mutex::new(None));
    let producer_slot = Arc::clone(&slot);
    let cleanup_log = Arc::clone(log);
    let stream = EventStream::new(move |emitter: Emitter<i32>| {
        *producer_slot.lock() = Some(emitter);
        let cleanup_log = Arc::clone(&cleanup_log);
        Ok(Teardown::new(move || {
            cleanup_log.lock().push("cleanup".to_string());
            Ok(())
        }))
    });
    (stream, slot)
}

fn emitter_of(slot: &Arc<Mutex<Option<Emitter<i32>>>>) -> Emitter<i32> {
    slot.lock().clone().expect("producer ran")
}

fn record<T: std::fmt::Debug + Send + 'static>(stream: &EventStream<T>, log: &Log) {
    let next_log = Arc::clone(log);
    let error_log = Arc::clone(log);
    let complete_log = Arc::clone(log);
    stream
        .listen(
            Observer::new()
                .on_next(move |v: T| {
                    next_log.lock().push(format!("{:?}", v));
                    Ok(())
                })
                .on_error(move |e| {
                    error_log.lock().push(format!("error:{}", e));
                    Ok(())
                })
                .on_complete(move || {
                    complete_log.lock().push("complete".to_string());
                    Ok(())
                }),
        )
        .unwrap();
}

#[test]
fn test_map_transforms_values() {
    let (factory, queue) = queue_factory();
    let log = new_log();

    record(&factory.of(vec![1, 2, 3]).map(|x| x * 10), &log);
    queue.run_until_idle();

    assert_eq!(*log.lock(), vec!["10", "20", "30", "complete"]);
}

#[test]
fn test_filter_keeps_matching_values() {
    let (factory, queue) = queue_factory();
    let log = new_log();

    record(&factory.of(1..=6).filter(|x| x % 2 == 0), &log);
    queue.run_until_idle();

    assert_eq!(*log.lock(), vec!["2", "4", "6", "complete"]);
}

#[test]
fn test_try_map_error_terminates_and_cancels_source() {
    let source_log = new_log();
    let (source, slot) = manual_stream(&source_log);
    let log = new_log();

    record(
        &source.try_map(|x| {
            if x > 1 {
                Err(StreamError::custom("too big"))
            } else {
                Ok(x)
            }
        }),
        &log,
    );

    let emitter = emitter_of(&slot);
    emitter.next(1).unwrap();
    emitter.next(2).unwrap();
    emitter.next(3).unwrap();

    assert_eq!(*log.lock(), vec!["1", "error:Stream error: too big"]);
    assert_eq!(*source_log.lock(), vec!["cleanup"]);
    assert!(emitter.is_closed());
}

#[test]
fn test_try_filter_error_terminates() {
    let (factory, queue) = queue_factory();
    let log = new_log();

    record(
        &factory.of(vec![1, 2, 3]).try_filter(|x| {
            if *x == 2 {
                Err(StreamError::custom("bad predicate"))
            } else {
                Ok(true)
            }
        }),
        &log,
    );
    queue.run_until_idle();

    assert_eq!(*log.lock(), vec!["1", "error:Stream error: bad predicate"]);
}

#[test]
fn test_cancelling_derived_stream_cancels_source() {
    let source_log = new_log();
    let (source, slot) = manual_stream(&source_log);

    let handle = source.map(|x| x + 1).listen(Observer::new()).unwrap();
    handle.cancel().unwrap();

    assert_eq!(*source_log.lock(), vec!["cleanup"]);
    assert!(emitter_of(&slot).is_closed());
}

#[test]
fn test_derived_stream_propagates_listen_failure() {
    let failing = EventStream::new(|_emitter: Emitter<i32>| Err(StreamError::custom("offline")));
    let result = failing.map(|x| x * 2).listen(Observer::new());
    assert_eq!(result.unwrap_err(), StreamError::custom("offline"));
}

#[test]
fn test_operators_keep_source_factory() {
    let (factory, _queue) = queue_factory();
    let derived = factory.of(vec![1, 2]).map(|x| x + 1).filter(|x| *x > 0);
    assert!(derived.factory().same_as(&factory));
    assert!(!derived.factory().same_as(&StreamFactory::global()));
}

#[tokio::test]
async fn test_for_each_resolves_on_completion() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let result = EventStream::of(vec![1, 2, 3])
        .for_each(move |v| {
            sink.lock().push(v);
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_for_each_pending_until_deferred_delivery() {
    let (factory, queue) = queue_factory();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut fut = tokio_test::task::spawn(factory.of(vec!["a", "b"]).for_each(move |v| {
        sink.lock().push(v);
        Ok(())
    }));
    assert_pending!(fut.poll());
    assert!(seen.lock().is_empty());

    queue.run_until_idle();
    assert_ready_ok!(fut.poll());
    assert_eq!(*seen.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_for_each_rejects_on_stream_error() {
    let log = new_log();
    let (source, slot) = manual_stream(&log);

    let mut fut = tokio_test::task::spawn(source.for_each(|_| Ok(())));
    emitter_of(&slot).next(1).unwrap();
    emitter_of(&slot)
        .error(StreamError::custom("disconnected"))
        .unwrap();

    let err = assert_ready_err!(fut.poll());
    assert_eq!(err, StreamError::custom("disconnected"));
}

#[tokio::test]
async fn test_for_each_callback_error_cancels_and_rejects() {
    let (factory, queue) = queue_factory();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut fut = tokio_test::task::spawn(factory.of(vec![1, 2, 3]).for_each(move |v| {
        sink.lock().push(v);
        if v == 2 {
            Err(StreamError::custom("stop at two"))
        } else {
            Ok(())
        }
    }));
    queue.run_until_idle();

    let err = assert_ready_err!(fut.poll());
    assert_eq!(err, StreamError::custom("stop at two"));
    assert_eq!(*seen.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_for_each_settles_after_cleanup() {
    let log = new_log();
    let (source, slot) = manual_stream(&log);

    let mut fut = tokio_test::task::spawn(source.for_each(|_| Ok(())));
    assert_pending!(fut.poll());

    emitter_of(&slot).complete().unwrap();
    // Cleanup has already run by the time the future can resolve.
    assert_eq!(*log.lock(), vec!["cleanup"]);
    assert_ready_ok!(fut.poll());
}

#[tokio::test]
async fn test_for_each_callback_error_settles_after_cleanup() {
    let log = new_log();
    let (source, slot) = manual_stream(&log);

    let mut fut = tokio_test::task::spawn(source.for_each(|_| Err(StreamError::custom("no"))));
    emitter_of(&slot).next(1).unwrap();

    assert_eq!(*log.lock(), vec!["cleanup"]);
    let outcome = assert_ready!(fut.poll());
    assert_eq!(outcome, Err(StreamError::custom("no")));
    // Later values never reach the callback.
    assert!(emitter_of(&slot).next(2).is_ok());
}

#[tokio::test]
async fn test_for_each_listen_failure_rejects() {
    let failing = EventStream::new(|_emitter: Emitter<i32>| Err(StreamError::custom("offline")));
    let result = failing.for_each(|_| Ok(())).await;
    assert_eq!(result, Err(StreamError::custom("offline")));
}

#[tokio::test]
async fn test_dropping_for_each_cancels_subscription() {
    let log = new_log();
    let (source, slot) = manual_stream(&log);
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);

    let mut fut = tokio_test::task::spawn(source.for_each(move |_| {
        *counter.lock() += 1;
        Ok(())
    }));
    assert_pending!(fut.poll());
    emitter_of(&slot).next(1).unwrap();
    assert_eq!(*calls.lock(), 1);

    drop(fut);
    assert_eq!(*log.lock(), vec!["cleanup"]);
    assert!(emitter_of(&slot).is_closed());

    emitter_of(&slot).next(2).unwrap();
    assert_eq!(*calls.lock(), 1);
}

#[tokio::test]
async fn test_dropping_settled_for_each_does_not_rerun_cleanup() {
    let log = new_log();
    let (source, slot) = manual_stream(&log);

    let mut fut = tokio_test::task::spawn(source.for_each(|_| Ok(())));
    emitter_of(&slot).complete().unwrap();
    assert_ready_ok!(fut.poll());

    drop(fut);
    assert_eq!(*log.lock(), vec!["cleanup"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_for_each_failure_from_other_thread_always_cancels() {
    for _ in 0..200 {
        let log = new_log();
        let cleanup_log = Arc::clone(&log);
        let source = EventStream::new(move |emitter: Emitter<i32>| {
            // Retries until the subscription leaves `Initializing`.
            std::thread::spawn(move || while emitter.next(1).is_err() {});
            let cleanup_log = Arc::clone(&cleanup_log);
            Ok(Teardown::new(move || {
                cleanup_log.lock().push("cleanup".to_string());
                Ok(())
            }))
        });

        let result = source
            .for_each(|_| Err(StreamError::custom("refused")))
            .await;
        assert_eq!(result, Err(StreamError::custom("refused")));
        assert_eq!(*log.lock(), vec!["cleanup"]);
    }
}
