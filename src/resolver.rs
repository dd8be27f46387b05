use std::{fmt, sync::Arc};

use crate::{shared::Shared, Config, Error, Promise, Reason, Resolution, Value};

/// The producer side of a promise: the only handle that can settle it.
///
/// Clones share the same promise. When the last clone is dropped while the
/// promise is still pending, the promise is rejected with
/// [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Resolver};
/// use futures::executor::block_on;
/// use std::thread;
/// let (resolver, promise) = Resolver::<String, Error>::new();
/// let consumer = promise.clone();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", consumer.await);
/// }));
/// let task2 = thread::spawn(move || resolver.fulfill("Hi".into()));
/// task1.join().expect("The task1 thread has panicked");
/// task2.join().expect("The task2 thread has panicked").unwrap();
/// assert_eq!(promise.value(), Some("Hi".to_string()));
/// ```
pub struct Resolver<T: Value, E: Reason> {
    handle: Arc<Handle<T, E>>,
}

struct Handle<T: Value, E: Reason> {
    shared: Arc<Shared<T, E>>,
}

impl<T: Value, E: Reason> Drop for Handle<T, E> {
    fn drop(&mut self) {
        self.shared.abandon();
    }
}

impl<T: Value, E: Reason> Resolver<T, E> {
    /// Creates a pending promise with the default [`Config`].
    pub fn new() -> (Self, Promise<T, E>) {
        Self::with_config(Config::default(), None)
    }

    /// Same as [`Resolver::new`], but names the promise for logs and debugging.
    pub fn named(name: impl Into<String>) -> (Self, Promise<T, E>) {
        Self::with_config(Config::default(), Some(name.into()))
    }

    pub fn with_config(config: Config, name: Option<String>) -> (Self, Promise<T, E>) {
        let shared = Shared::new(name, config);
        let resolver = Self {
            handle: Arc::new(Handle {
                shared: shared.clone(),
            }),
        };
        (resolver, Promise { shared })
    }

    /// Fulfills the promise with `value`.
    ///
    /// Settling a promise that is already settled, or already resolved with
    /// another promise, changes nothing; whether that is reported is up to
    /// the promise's [`SettlePolicy`](crate::SettlePolicy).
    pub fn fulfill(&self, value: T) -> Result<(), Error> {
        self.handle.shared.settle(Ok(value))
    }

    /// Rejects the promise with `reason`. Same rules as [`Resolver::fulfill`].
    pub fn reject(&self, reason: E) -> Result<(), Error> {
        self.handle.shared.settle(Err(reason))
    }

    /// Resolves the promise with a value or with another promise.
    ///
    /// Resolving with a promise makes this one adopt its eventual outcome.
    /// Resolving with itself rejects with [`Error::SelfResolution`], and
    /// closing a loop of promises waiting on each other rejects with
    /// [`Error::ResolutionCycle`].
    pub fn resolve(&self, resolution: Resolution<T, E>) -> Result<(), Error> {
        self.handle.shared.resolve(Ok(resolution))
    }

    /// Settles from a handler's result. The downstream promise this is used
    /// for has no other producer, so refusals cannot happen.
    pub(crate) fn settle_with(&self, result: crate::Settle<T, E>) {
        let _ = self.handle.shared.resolve(result);
    }

    /// A consumer handle for the promise this resolver settles.
    pub fn promise(&self) -> Promise<T, E> {
        Promise {
            shared: self.handle.shared.clone(),
        }
    }
}

impl<T: Value, E: Reason> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T: Value, E: Reason> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("name", &self.handle.shared.label())
            .field("state", &self.handle.shared.state())
            .finish()
    }
}
