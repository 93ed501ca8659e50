//! Push-based event streams
//!
//! An [`EventStream`] wraps a producer function. Every `listen` call creates
//! an independent subscription and runs the producer again, so a stream can
//! be consumed any number of times. Operators build their result through the
//! source's [`StreamFactory`].

pub mod core;
pub mod factory;
pub mod constructors;
pub mod advanced;
pub mod select;

// Re-export core types
pub use self::core::{EventStream, ProducerFn};

pub use factory::{StreamFactory, StreamFactoryBuilder};

// Re-export constructors
pub use constructors::{Foreign, IntoEventStream, Iterable, Listenable};

// Re-export fan-in combinators
pub use select::{combine_latest, merge, zip};
