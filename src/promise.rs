use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use crate::{
    shared::{Reaction, Shared},
    Config, Reason, Settled, State, Thenable, Value,
};

/// The consumer side of a promise: read-only, cloneable, chainable, and
/// awaitable.
///
/// Awaiting yields `Ok(value)` once fulfilled or `Err(reason)` once rejected.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Promise, Resolver};
/// use futures::executor::block_on;
/// use std::thread;
/// let (promise, consumer) = Resolver::<String, Error>::new();
/// let consumer2 = consumer.clone();
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received on task 1 {:?}", consumer.await);
/// }));
/// let task2 = thread::spawn(move || block_on(async {
///     println!("Received on task 2 {:?}", consumer2.await);
/// }));
/// promise.fulfill("Hi".into()).unwrap();
/// task1.join().expect("The task1 thread has panicked.");
/// task2.join().expect("The task2 thread has panicked.");
/// ```
pub struct Promise<T, E> {
    pub(crate) shared: Arc<Shared<T, E>>,
}

impl<T, E> Promise<T, E> {
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    pub fn config(&self) -> &Config {
        self.shared.config()
    }
}

impl<T: Value, E: Reason> Promise<T, E> {
    /// A promise already fulfilled with `value`, using the default [`Config`].
    pub fn fulfilled(value: T) -> Self {
        Self::settled_with(Config::default(), Ok(value))
    }

    /// A promise already rejected with `reason`, using the default [`Config`].
    pub fn rejected(reason: E) -> Self {
        Self::settled_with(Config::default(), Err(reason))
    }

    pub fn settled_with(config: Config, outcome: Result<T, E>) -> Self {
        Self {
            shared: Shared::settled(config, outcome),
        }
    }

    /// Current state. Thread-safe.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Fulfillment value, `None` while pending or if rejected.
    pub fn value(&self) -> Option<T> {
        self.shared.value()
    }

    /// Rejection reason, `None` while pending or if fulfilled.
    pub fn reason(&self) -> Option<E> {
        self.shared.reason()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// Blocks the current thread until the promise settles.
    ///
    /// Don't call this from a serial context that one of this promise's
    /// own handlers is waiting to run on.
    pub fn wait(&self) -> Result<T, E> {
        futures::executor::block_on(self.clone())
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Value, E: Reason> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("name", &self.shared.label())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Value, E: Reason> Thenable<T, E> for Promise<T, E> {
    fn subscribe(self: Box<Self>, settle: Settled<T, E>) {
        self.shared.subscribe(Reaction::Schedule(settle));
    }
}

impl<T: Value, E: Reason> Future for Promise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match self.shared.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}
