//! Deferred task scheduling and the host error sink
//!
//! `of` and the iterable branch of `from` never deliver from inside the call
//! that subscribed. They hand their enumeration to a [`Scheduler`] instead.
//! Work deferred while a `listen` call is still on the stack is held back
//! until the outermost `listen` on the current thread returns, so a deferred
//! task can never observe a subscription that is still initializing, even
//! when the scheduler runs it on another worker thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{StreamError, StreamResult};
use crate::stream_configuration::UncaughtErrorPolicy;

/// Unit of deferred work, already wired to its error reporting
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Deferred work as producers write it: a failure is reported to the host error sink
pub type Task = Box<dyn FnOnce() -> StreamResult<()> + Send + 'static>;

/// Runs jobs after the current synchronous turn
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job) -> StreamResult<()>;
}

/// Receives stream errors that nothing else handled
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &StreamError);
}

/// Spawns jobs onto the tokio runtime of the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, job: Job) -> StreamResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Scheduler(e.to_string()))?;
        handle.spawn(async move { job() });
        Ok(())
    }
}

/// Explicit FIFO task queue, drained by the owner
///
/// Useful where no runtime is available, or where a test wants to decide
/// exactly when deferred delivery happens.
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to run
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Run queued jobs until the queue is empty, including jobs queued by
    /// the jobs themselves. Returns how many jobs ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock must be released before the job runs: jobs enqueue more jobs.
            let job = self.jobs.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Scheduler for MicrotaskQueue {
    fn schedule(&self, job: Job) -> StreamResult<()> {
        self.jobs.lock().push_back(job);
        Ok(())
    }
}

impl std::fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Default host error sink, driven by an [`UncaughtErrorPolicy`]
#[derive(Debug, Clone)]
pub struct LogReporter {
    name: String,
    policy: UncaughtErrorPolicy,
}

impl LogReporter {
    pub fn new(name: impl Into<String>, policy: UncaughtErrorPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }
}

impl ErrorReporter for LogReporter {
    fn report(&self, error: &StreamError) {
        match self.policy {
            UncaughtErrorPolicy::Log => {
                log::error!("[{}] uncaught stream error: {}", self.name, error)
            }
            UncaughtErrorPolicy::Panic => panic!("[{}] uncaught stream error: {}", self.name, error),
            UncaughtErrorPolicy::Ignore => {
                log::trace!("[{}] ignoring uncaught stream error: {}", self.name, error)
            }
        }
    }
}

struct Deferred {
    scheduler: Arc<dyn Scheduler>,
    reporter: Arc<dyn ErrorReporter>,
    task: Task,
}

impl Deferred {
    fn dispatch(self) {
        let Deferred {
            scheduler,
            reporter,
            task,
        } = self;
        let task_reporter = Arc::clone(&reporter);
        let job: Job = Box::new(move || {
            if let Err(e) = task() {
                task_reporter.report(&e);
            }
        });
        if let Err(e) = scheduler.schedule(job) {
            log::warn!("deferred task dropped: {}", e);
            reporter.report(&e);
        }
    }
}

#[derive(Default)]
struct Turn {
    depth: usize,
    held: Vec<Deferred>,
}

thread_local! {
    static TURN: RefCell<Turn> = RefCell::new(Turn::default());
}

/// Marks a `listen` call in progress on this thread. Held work is released
/// when the outermost guard drops.
pub(crate) struct TurnGuard {
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn enter_turn() -> TurnGuard {
    TURN.with(|turn| turn.borrow_mut().depth += 1);
    TurnGuard {
        _not_send: PhantomData,
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let released = TURN.with(|turn| {
            let mut turn = turn.borrow_mut();
            turn.depth -= 1;
            if turn.depth == 0 {
                std::mem::take(&mut turn.held)
            } else {
                Vec::new()
            }
        });
        for deferred in released {
            deferred.dispatch();
        }
    }
}

/// Schedule `task` after the current turn. Errors it returns go to `reporter`.
pub(crate) fn defer(
    scheduler: Arc<dyn Scheduler>,
    reporter: Arc<dyn ErrorReporter>,
    task: Task,
) {
    let deferred = Deferred {
        scheduler,
        reporter,
        task,
    };
    let ready = TURN.with(|turn| {
        let mut turn = turn.borrow_mut();
        if turn.depth > 0 {
            turn.held.push(deferred);
            None
        } else {
            Some(deferred)
        }
    });
    if let Some(deferred) = ready {
        deferred.dispatch();
    }
}
