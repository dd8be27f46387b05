#[cfg(test)]
mod tests {
    use futures::executor::{block_on, ThreadPool};
    use promise_aplus::{Context, Error, Handler, JobQueue, Promise, Resolution, Resolver, State};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn test_single_settlement() {
        let (resolver, promise) = Resolver::<i32, Error>::new();
        resolver.reject(Error::reason("first")).unwrap();
        resolver.fulfill(1).unwrap();
        resolver.reject(Error::reason("second")).unwrap();
        assert_eq!(promise.state(), State::Rejected);
        assert_eq!(promise.reason(), Some(Error::reason("first")));
        assert_eq!(promise.value(), None);
    }

    #[test]
    fn test_identity_defaults() {
        let context = Context::serial("identity").expect("spawn serial worker");
        let fulfilled = Promise::<i32, Error>::fulfilled(42).then(Some(&context), None, None);
        let rejected =
            Promise::<i32, Error>::rejected(Error::reason("err")).then(Some(&context), None, None);
        assert_eq!(block_on(fulfilled), Ok(42));
        assert_eq!(block_on(rejected), Err(Error::reason("err")));
    }

    #[test]
    fn test_flattening() {
        let pool = ThreadPool::new().expect("build thread pool");
        let context = Context::thread_pool(pool);
        let (outer, promise) = Resolver::<String, Error>::new();
        let (inner, inner_promise) = Resolver::<String, Error>::new();
        let next = promise.then(
            Some(&context),
            Some(Handler::new(move |_| Ok(Resolution::Promise(inner_promise)))),
            None,
        );
        outer.fulfill("outer".into()).unwrap();
        let task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            inner.fulfill("inner".into())
        });
        assert_eq!(block_on(next), Ok("inner".to_string()));
        task.join().expect("The task thread has panicked").unwrap();
    }

    #[test]
    fn test_self_resolution_guard() {
        let (resolver, promise) = Resolver::<i32, Error>::new();
        resolver.resolve(promise.clone().into()).unwrap();
        assert_eq!(promise.state(), State::Rejected);
        assert_eq!(promise.reason(), Some(Error::SelfResolution));
    }

    #[test]
    fn test_handler_fault_isolation() {
        let context = Context::spawn();
        let (resolver, upstream) = Resolver::<i32, Error>::new();
        let failed = upstream.and_then::<i32>(
            Some(&context),
            Handler::new(|_| Err(Error::reason("handler failed"))),
        );
        let panicked = upstream.map(Some(&context), |v| -> i32 {
            if v > 0 {
                panic!("handler exploded");
            }
            v
        });
        resolver.fulfill(1).unwrap();
        assert_eq!(failed.wait(), Err(Error::reason("handler failed")));
        assert_eq!(
            panicked.wait(),
            Err(Error::HandlerPanicked("handler exploded".to_string()))
        );
        assert_eq!(upstream.state(), State::Fulfilled);
        assert_eq!(upstream.value(), Some(1));
    }

    #[test]
    fn test_late_attachment() {
        let queue = JobQueue::new();
        let context = queue.context("late");
        let calls = Arc::new(AtomicUsize::new(0));
        let promise = Promise::<i32, Error>::fulfilled(5);
        let seen = calls.clone();
        let next = promise.map(Some(&context), move |v| {
            seen.fetch_add(1, Ordering::SeqCst);
            v * 2
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(queue.run_until_idle(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.value(), Some(10));
    }

    #[test]
    fn test_fan_out_ordering() {
        let queue = JobQueue::new();
        let context = queue.context("fan-out");
        let order = Arc::new(Mutex::new(vec![]));
        let (resolver, promise) = Resolver::<&'static str, Error>::new();
        for reaction in ["R1", "R2", "R3"] {
            let order = order.clone();
            promise.map(Some(&context), move |_| order.lock().unwrap().push(reaction));
        }
        resolver.fulfill("go").unwrap();
        queue.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["R1", "R2", "R3"]);
    }

    #[test]
    fn test_rejection_tunneling() {
        let context = Context::serial("tunnel").expect("spawn serial worker");
        let (resolver, promise) = Resolver::<i32, Error>::new();
        let received = Arc::new(Mutex::new(None));
        let sink = received.clone();
        let last = promise
            .then(Some(&context), None, None)
            .then(Some(&context), None, None)
            .then(
                Some(&context),
                Some(Handler::new(|_| Err(Error::reason("fulfillment handler ran")))),
                Some(Handler::new(move |reason| {
                    *sink.lock().unwrap() = Some(reason);
                    Ok(Resolution::Value(0))
                })),
            );
        resolver.reject(Error::reason("boom")).unwrap();
        assert_eq!(last.wait(), Ok(0));
        assert_eq!(*received.lock().unwrap(), Some(Error::reason("boom")));
    }

    #[test]
    fn test_concurrent_attach_and_settle() {
        let pool = ThreadPool::new().expect("build thread pool");
        let context = Context::thread_pool(pool);
        let (resolver, promise) = Resolver::<usize, Error>::new();
        let attachers: Vec<_> = (0..8)
            .map(|i| {
                let promise = promise.clone();
                let context = context.clone();
                thread::spawn(move || promise.map(Some(&context), move |v| v + i))
            })
            .collect();
        let settler = thread::spawn(move || resolver.fulfill(100));
        settler.join().expect("The settler thread has panicked").unwrap();
        for (i, attacher) in attachers.into_iter().enumerate() {
            let chained = attacher.join().expect("The attacher thread has panicked");
            assert_eq!(chained.wait(), Ok(100 + i));
        }
    }
}
