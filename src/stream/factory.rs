//! Stream factories
//!
//! A factory is what a stream derives new streams through. It carries the
//! configuration, the scheduler used for deferred delivery and the host
//! error sink. Operators on a stream always build their result with the
//! source's factory, so streams built by a custom factory keep producing
//! streams of that factory.

use std::fmt;
use std::sync::Arc;

use crate::error::{StreamError, StreamResult};
use crate::scheduler::{self, ErrorReporter, LogReporter, Scheduler, Task, TokioScheduler};
use crate::stream::core::EventStream;
use crate::stream_configuration::{StreamConfig, UncaughtErrorPolicy};
use crate::subscription::{Emitter, Teardown};

struct FactoryInner {
    config: StreamConfig,
    scheduler: Arc<dyn Scheduler>,
    reporter: Arc<dyn ErrorReporter>,
}

/// Builds event streams. Cheap to clone; clones compare equal under [`StreamFactory::same_as`].
#[derive(Clone)]
pub struct StreamFactory {
    inner: Arc<FactoryInner>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_FACTORY: StreamFactory = StreamFactory::from_config(StreamConfig::default());
}

impl StreamFactory {
    /// The process-wide default factory used by `EventStream::new`, `of` and `from`
    pub fn global() -> StreamFactory {
        GLOBAL_FACTORY.clone()
    }

    /// A factory with the tokio scheduler and a [`LogReporter`] driven by `config`
    pub fn from_config(config: StreamConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> StreamFactoryBuilder {
        StreamFactoryBuilder::default()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Identity comparison: true only for clones of the same factory
    pub fn same_as(&self, other: &StreamFactory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wrap a producer function in a stream of this factory
    pub fn create<T, F>(&self, producer: F) -> EventStream<T>
    where
        T: Send + 'static,
        F: Fn(Emitter<T>) -> StreamResult<Teardown> + Send + Sync + 'static,
    {
        EventStream::from_parts(Arc::new(producer), self.clone())
    }

    /// Hand an error to the host error sink
    pub fn report(&self, error: &StreamError) {
        self.inner.reporter.report(error);
    }

    pub(crate) fn defer(&self, task: Task) {
        scheduler::defer(
            Arc::clone(&self.inner.scheduler),
            Arc::clone(&self.inner.reporter),
            task,
        );
    }
}

impl Default for StreamFactory {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFactory")
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for a [`StreamFactory`] with a custom scheduler or error sink
#[derive(Default)]
pub struct StreamFactoryBuilder {
    config: StreamConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl StreamFactoryBuilder {
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn uncaught_errors(mut self, policy: UncaughtErrorPolicy) -> Self {
        self.config.uncaught_errors = policy;
        self
    }

    /// Set the scheduler that runs deferred delivery
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the host error sink; overrides `uncaught_errors`
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> StreamFactory {
        let StreamFactoryBuilder {
            config,
            scheduler,
            reporter,
        } = self;
        let scheduler = scheduler.unwrap_or_else(|| Arc::new(TokioScheduler));
        let reporter = reporter.unwrap_or_else(|| {
            Arc::new(LogReporter::new(config.name.clone(), config.uncaught_errors))
        });
        log::debug!("stream factory '{}' created", config.name);
        StreamFactory {
            inner: Arc::new(FactoryInner {
                config,
                scheduler,
                reporter,
            }),
        }
    }
}
