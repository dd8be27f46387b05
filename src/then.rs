//! The chaining operator.
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};
use tracing::{trace, warn};

use crate::{
    shared::Reaction, Context, Error, Promise, Reason, Resolution, Resolver, Settle, Value,
};

/// A one-shot handler mapping one input to the settlement of a downstream
/// promise.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, Handler, Resolution};
/// let double = Handler::<i32, i32, Error>::new(|v| Ok(Resolution::Value(v * 2)));
/// let describe = Handler::<i32, String, Error>::value(|v| format!("got {v}"));
/// # let _ = (double, describe);
/// ```
pub struct Handler<I, U, E>(Box<dyn FnOnce(I) -> Settle<U, E> + Send + 'static>);

impl<I, U, E> Handler<I, U, E> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(I) -> Settle<U, E> + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// A handler that always fulfills with what `f` returns.
    pub fn value<F>(f: F) -> Self
    where
        F: FnOnce(I) -> U + Send + 'static,
    {
        Self::new(move |input| Ok(Resolution::Value(f(input))))
    }
}

impl<I, U, E: From<Error>> Handler<I, U, E> {
    /// Runs the handler. A panic becomes a rejection.
    fn call(self, input: I) -> Settle<U, E> {
        match panic::catch_unwind(AssertUnwindSafe(move || (self.0)(input))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%message, "promise handler panicked");
                Err(E::from(Error::HandlerPanicked(message)))
            }
        }
    }
}

impl<I, U, E> fmt::Debug for Handler<I, U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Value, E: Reason> Promise<T, E> {
    /// Attaches handlers and returns the promise they settle.
    ///
    /// Handlers run on `context`, or on the config's default context when
    /// `None`. A missing `on_fulfilled` passes the value through, a missing
    /// `on_rejected` passes the rejection through. Whatever the handler
    /// returns is resolved into the returned promise: a value fulfills it,
    /// a promise is adopted, an `Err` (or a panic) rejects it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{Context, Error, Handler, Promise, Resolution};
    /// let context = Context::spawn();
    /// let recovered = Promise::<i32, Error>::rejected(Error::reason("boom"))
    ///     .then(Some(&context), None, None)
    ///     .then(
    ///         Some(&context),
    ///         None,
    ///         Some(Handler::new(|_reason| Ok(Resolution::Value(0)))),
    ///     );
    /// assert_eq!(recovered.wait(), Ok(0));
    /// ```
    pub fn then(
        &self,
        context: Option<&Context>,
        on_fulfilled: Option<Handler<T, T, E>>,
        on_rejected: Option<Handler<E, T, E>>,
    ) -> Promise<T, E> {
        let on_fulfilled = on_fulfilled.unwrap_or_else(|| Handler::value(|value| value));
        let on_rejected = on_rejected.unwrap_or_else(|| Handler::new(Err));
        self.then_with(context, on_fulfilled, on_rejected)
    }

    /// Chains a fulfillment handler that may change the value type.
    /// Rejections pass through untouched.
    pub fn and_then<U: Value>(
        &self,
        context: Option<&Context>,
        on_fulfilled: Handler<T, U, E>,
    ) -> Promise<U, E> {
        self.then_with(context, on_fulfilled, Handler::new(Err))
    }

    /// Chains a plain function over the fulfillment value.
    pub fn map<U, F>(&self, context: Option<&Context>, f: F) -> Promise<U, E>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(context, Handler::value(f))
    }

    /// Chains a rejection handler; fulfillment values pass through.
    pub fn catch(&self, context: Option<&Context>, on_rejected: Handler<E, T, E>) -> Promise<T, E> {
        self.then(context, None, Some(on_rejected))
    }

    /// Like [`Promise::then`], but the handlers may settle the returned
    /// promise with a different value type. Both handlers are required,
    /// since a value can't pass through unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{Context, Error, Handler, Promise};
    /// let context = Context::spawn();
    /// let length = Promise::<String, Error>::fulfilled("four".into()).then_with(
    ///     Some(&context),
    ///     Handler::value(|text: String| text.len()),
    ///     Handler::new(Err),
    /// );
    /// assert_eq!(length.wait(), Ok(4));
    /// ```
    pub fn then_with<U: Value>(
        &self,
        context: Option<&Context>,
        on_fulfilled: Handler<T, U, E>,
        on_rejected: Handler<E, U, E>,
    ) -> Promise<U, E> {
        let config = self.config().clone();
        let context = context
            .cloned()
            .unwrap_or_else(|| config.default_context().clone());
        let (resolver, downstream) = Resolver::<U, E>::with_config(config, None);
        trace!(
            promise = self.shared.label(),
            context = context.label(),
            "reaction registered"
        );
        self.shared.subscribe(Reaction::Schedule(Box::new(move |outcome: Result<T, E>| {
            let job_context = context.clone();
            context.execute(Box::new(move || {
                trace!(context = job_context.label(), "running handler");
                let result = match outcome {
                    Ok(value) => on_fulfilled.call(value),
                    Err(reason) => on_rejected.call(reason),
                };
                resolver.settle_with(result);
            }));
        })));
        downstream
    }
}

#[cfg(test)]
mod tests {
    use super::Handler;
    use crate::{Context, Error, JobQueue, Promise, Resolution, Resolver};
    use futures::executor::block_on;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[test]
    fn test_identity_defaults() {
        let context = Context::spawn();
        let fulfilled = Promise::<i32, Error>::fulfilled(42).then(Some(&context), None, None);
        assert_eq!(block_on(fulfilled), Ok(42));
        let rejected =
            Promise::<i32, Error>::rejected(Error::reason("err")).then(Some(&context), None, None);
        assert_eq!(block_on(rejected), Err(Error::reason("err")));
    }

    #[test]
    fn test_default_context_from_config() {
        let (resolver, promise) = Resolver::<i32, Error>::new();
        let next = promise.then(None, None, None);
        resolver.fulfill(5).unwrap();
        assert_eq!(next.wait(), Ok(5));
    }

    #[test]
    fn test_handler_does_not_run_inline() {
        let queue = JobQueue::new();
        let context = queue.context("manual");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let next = Promise::<i32, Error>::fulfilled(7).then(
            Some(&context),
            Some(Handler::new(move |v| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Resolution::Value(v))
            })),
            None,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(next.is_pending());
        queue.run_until_idle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.value(), Some(7));
    }

    #[test]
    fn test_only_matching_handler_runs() {
        let queue = JobQueue::new();
        let context = queue.context("manual");
        let (resolver, promise) = Resolver::<i32, Error>::new();
        let next = promise.then(
            Some(&context),
            Some(Handler::new(|_| panic!("fulfillment handler must not run"))),
            Some(Handler::new(|reason| match reason {
                Error::Reason(message) => Ok(Resolution::Value(message.len() as i32)),
                other => Err(other),
            })),
        );
        resolver.reject(Error::reason("four")).unwrap();
        queue.run_until_idle();
        assert_eq!(next.value(), Some(4));
    }

    #[test]
    fn test_handler_error_rejects_downstream() {
        let queue = JobQueue::new();
        let context = queue.context("manual");
        let upstream = Promise::<i32, Error>::fulfilled(1);
        let next = upstream.and_then::<i32>(
            Some(&context),
            Handler::new(|_| Err(Error::reason("handler failed"))),
        );
        queue.run_until_idle();
        assert_eq!(next.reason(), Some(Error::reason("handler failed")));
        assert_eq!(upstream.value(), Some(1));
    }

    #[test]
    fn test_handler_panic_rejects_downstream() {
        let queue = JobQueue::new();
        let context = queue.context("manual");
        let upstream = Promise::<i32, Error>::fulfilled(1);
        let next = upstream.map(Some(&context), |_| -> i32 { panic!("kaboom") });
        queue.run_until_idle();
        assert_eq!(
            next.reason(),
            Some(Error::HandlerPanicked("kaboom".to_string()))
        );
        assert!(upstream.is_fulfilled());
    }

    #[test]
    fn test_handler_returning_promise_is_flattened() {
        let context = Context::serial("flatten").expect("spawn serial worker");
        let (inner, inner_promise) = Resolver::<String, Error>::new();
        let next = Promise::<String, Error>::fulfilled("outer".into()).then(
            Some(&context),
            Some(Handler::new(move |_| Ok(inner_promise.into()))),
            None,
        );
        inner.fulfill("inner".into()).unwrap();
        assert_eq!(next.wait(), Ok("inner".to_string()));
    }

    #[test]
    fn test_catch_stops_rejection() {
        let context = Context::spawn();
        let recovered = Promise::<i32, Error>::rejected(Error::reason("boom"))
            .map(Some(&context), |v| v + 1)
            .catch(Some(&context), Handler::value(|_| -1))
            .map(Some(&context), |v| v * 10);
        assert_eq!(recovered.wait(), Ok(-10));
    }

    #[test]
    fn test_map_changes_type() {
        let context = Context::spawn();
        let text = Promise::<i32, Error>::fulfilled(12).map(Some(&context), |v| format!("#{v}"));
        assert_eq!(text.wait(), Ok("#12".to_string()));
    }

    #[test]
    fn test_then_with_changes_type_on_either_path() {
        let context = Context::spawn();
        let describe = || {
            (
                Handler::value(|v: i32| format!("value {v}")),
                Handler::value(|reason: Error| format!("recovered from {reason}")),
            )
        };
        let (on_fulfilled, on_rejected) = describe();
        let fulfilled =
            Promise::<i32, Error>::fulfilled(3).then_with(Some(&context), on_fulfilled, on_rejected);
        let (on_fulfilled, on_rejected) = describe();
        let rejected = Promise::<i32, Error>::rejected(Error::reason("boom")).then_with(
            Some(&context),
            on_fulfilled,
            on_rejected,
        );
        assert_eq!(fulfilled.wait(), Ok("value 3".to_string()));
        assert_eq!(rejected.wait(), Ok("recovered from boom".to_string()));
    }

    #[test]
    fn test_dropped_job_rejects_downstream() {
        let context = Context::from_fn("discard", |job| drop(job));
        let next = Promise::<i32, Error>::fulfilled(1).then(Some(&context), None, None);
        assert_eq!(next.reason(), Some(Error::ProducerDropped));
    }

    #[test]
    fn test_fan_out_schedules_in_registration_order() {
        let queue = JobQueue::new();
        let context = queue.context("manual");
        let order = Arc::new(Mutex::new(vec![]));
        let (resolver, promise) = Resolver::<i32, Error>::new();
        let chained: Vec<_> = (1..=3)
            .map(|i| {
                let order = order.clone();
                promise.map(Some(&context), move |v| {
                    order.lock().unwrap().push(i);
                    v + i
                })
            })
            .collect();
        assert!(queue.is_empty());
        resolver.fulfill(10).unwrap();
        assert_eq!(queue.len(), 3);
        queue.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        let values: Vec<_> = chained.iter().map(|p| p.value()).collect();
        assert_eq!(values, vec![Some(11), Some(12), Some(13)]);
    }
}
