//! Push-based event streams
//!
//! An [`EventStream`] wraps a producer function that drives delivery of
//! values, followed by at most one error or completion, to every consumer
//! that listens. Each `listen` gets its own [`subscription`] with
//! deterministic cancellation and exactly-once cleanup. Streams can be
//! drained in order through the push-to-pull adaptor ([`PullIter`]) and
//! composed with `concat`, `flat_map`, [`merge`], [`zip`] and
//! [`combine_latest`].

pub mod error;
pub mod pull;
pub mod scheduler;
pub mod stream;
pub mod stream_configuration;
pub mod subscription;

pub use error::{StreamError, StreamResult};
pub use pull::{Pull, PullIter, Step};
pub use scheduler::{ErrorReporter, LogReporter, MicrotaskQueue, Scheduler, TokioScheduler};
pub use stream::{
    combine_latest, merge, zip, EventStream, Foreign, IntoEventStream, Iterable, Listenable,
    ProducerFn, StreamFactory, StreamFactoryBuilder,
};
pub use stream_configuration::{StreamConfig, UncaughtErrorPolicy};
pub use subscription::{CancelHandle, Emitter, Observer, SubscriptionState, Teardown};
