use std::fmt;

use crate::{Error, Promise};

/// Possible promise states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Initial state.
    Pending,
    Fulfilled,
    Rejected,
}

impl State {
    pub fn is_settled(self) -> bool {
        self != State::Pending
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        })
    }
}

/// Values a promise can be fulfilled with.
pub trait Value: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Value for T {}

/// Reasons a promise can be rejected with.
pub trait Reason: Clone + Send + From<Error> + 'static {}

impl<E: Clone + Send + From<Error> + 'static> Reason for E {}

/// Callback a [`Thenable`] settles the adopting promise through.
pub type Settled<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

/// A promise-like value from outside this crate that a promise can adopt.
///
/// `subscribe` is called once, with the callback that settles the adopting
/// promise. Only the first outcome counts. Dropping the callback without
/// calling it rejects the adopting promise with [`Error::ProducerDropped`],
/// and a panic inside `subscribe` rejects it with
/// [`Error::HandlerPanicked`] unless the callback already ran.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Resolution, Resolver, Settled, Thenable};
///
/// struct Ready(i32);
///
/// impl Thenable<i32, Error> for Ready {
///     fn subscribe(self: Box<Self>, settle: Settled<i32, Error>) {
///         settle(Ok(self.0))
///     }
/// }
///
/// let (resolver, promise) = Resolver::<i32, Error>::new();
/// resolver.resolve(Resolution::thenable(Ready(7))).unwrap();
/// assert_eq!(promise.value(), Some(7));
/// ```
pub trait Thenable<T, E>: Send + 'static {
    fn subscribe(self: Box<Self>, settle: Settled<T, E>);
}

/// Candidate outcome for a promise being resolved: a plain value, another
/// promise whose eventual outcome should be adopted, or a foreign
/// [`Thenable`] adopted the same way.
pub enum Resolution<T, E> {
    Value(T),
    Promise(Promise<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E>) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Promise(promise)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f
                .debug_tuple("Promise")
                .field(&promise.name().unwrap_or("<unnamed>"))
                .finish(),
            Resolution::Thenable(_) => f.write_str("Thenable"),
        }
    }
}

/// What a handler hands back: `Ok` resolves the downstream promise, `Err`
/// rejects it.
pub type Settle<T, E> = Result<Resolution<T, E>, E>;
