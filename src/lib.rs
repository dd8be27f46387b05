//! Promise/A+ style promises for threads.
//!
//! A promise is created as a [`Resolver`]/[`Promise`] pair. The resolver is
//! the only side that can settle it; the promise side can be cloned freely,
//! queried, awaited, and chained with [`Promise::then`]. Handlers never run
//! on the settling thread: each one is submitted to the [`Context`] it was
//! registered with.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{Context, Error, Handler, Resolution, Resolver};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let context = Context::serial("example").unwrap();
//! let (resolver, promise) = Resolver::<i32, Error>::new();
//! let doubled = promise.then(
//!     Some(&context),
//!     Some(Handler::new(|value: i32| Ok(Resolution::Value(value * 2)))),
//!     None,
//! );
//! let task = thread::spawn(move || resolver.fulfill(21));
//! task.join().expect("The task thread has panicked").unwrap();
//! assert_eq!(block_on(doubled), Ok(42));
//! ```

pub mod config;
pub mod context;
mod shared;
pub mod promise;
pub mod resolver;
pub mod state;
pub mod then;

pub use config::{Config, SettlePolicy};
pub use context::{Context, ExecutionContext, Job, JobQueue};
pub use promise::Promise;
pub use resolver::Resolver;
pub use state::{Reason, Resolution, Settle, Settled, State, Thenable, Value};
pub use then::Handler;

/// Reasons produced by the promise machinery itself.
///
/// A promise's reason type must be convertible from this so that the crate
/// can reject on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("cannot resolve promise with itself")]
    SelfResolution,
    #[error("promise resolution cycle detected")]
    ResolutionCycle,
    #[error("promise handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("producer dropped before settling the promise")]
    ProducerDropped,
    #[error("promise is already settled")]
    AlreadySettled,
    #[error("{0}")]
    Reason(String),
}

impl Error {
    /// Plain rejection reason carrying a message.
    pub fn reason(message: impl Into<String>) -> Self {
        Error::Reason(message.into())
    }
}
