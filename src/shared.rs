//! State shared by a promise's producer and consumer handles, and the
//! settlement protocol that runs over it.
use parking_lot::{const_mutex, Mutex};
use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    task::Waker,
    thread,
};
use tracing::{debug, trace, warn};

use crate::{
    then::panic_message, Config, Error, Reason, Resolution, Settle, SettlePolicy, State, Thenable,
    Value,
};

/// Serializes cycle detection with the adoption links it inspects.
static ADOPTION: Mutex<()> = const_mutex(());

pub(crate) enum Reaction<T, E> {
    /// Submits a handler job to its execution context.
    Schedule(Box<dyn FnOnce(Result<T, E>) + Send>),
    /// Settles a promise that was resolved with this one.
    Adopt(Arc<Shared<T, E>>),
}

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
    /// Resolved with a promise or thenable and waiting on it.
    locked_in: bool,
    /// Some promise further down the adoption chain; path-compressed
    /// towards the chain's last link.
    adopting: Option<Weak<Shared<T, E>>>,
}

/// Everything a promise hands out at the moment it settles.
struct Drained<T, E> {
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Inner<T, E> {
    /// Settled, or waiting on something it was resolved with.
    fn is_locked(&self) -> bool {
        self.outcome.is_some() || self.locked_in
    }

    fn finish(&mut self, outcome: Result<T, E>) -> Drained<T, E> {
        self.outcome = Some(outcome);
        self.locked_in = false;
        self.adopting = None;
        Drained {
            reactions: std::mem::take(&mut self.reactions),
            wakers: std::mem::take(&mut self.wakers),
        }
    }
}

pub(crate) struct Shared<T, E> {
    inner: Mutex<Inner<T, E>>,
    name: Option<String>,
    config: Config,
}

impl<T, E> Shared<T, E> {
    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn label(&self) -> &str {
        self.name().unwrap_or("<unnamed>")
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}

impl<T: Value, E: Reason> Shared<T, E> {
    pub(crate) fn new(name: Option<String>, config: Config) -> Arc<Self> {
        Self::with_outcome(name, config, None)
    }

    pub(crate) fn settled(config: Config, outcome: Result<T, E>) -> Arc<Self> {
        Self::with_outcome(None, config, Some(outcome))
    }

    fn with_outcome(name: Option<String>, config: Config, outcome: Option<Result<T, E>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                outcome,
                reactions: vec![],
                wakers: vec![],
                locked_in: false,
                adopting: None,
            }),
            name,
            config,
        })
    }

    pub(crate) fn state(&self) -> State {
        match self.inner.lock().outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }

    pub(crate) fn value(&self) -> Option<T> {
        match &self.inner.lock().outcome {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn reason(&self) -> Option<E> {
        match &self.inner.lock().outcome {
            Some(Err(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Returns the outcome if settled, otherwise remembers `waker`.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<Result<T, E>> {
        let mut inner = self.inner.lock();
        if let Some(outcome) = inner.outcome.clone() {
            return Some(outcome);
        }
        if !inner.wakers.iter().any(|w| w.will_wake(waker)) {
            inner.wakers.push(waker.clone());
        }
        None
    }

    /// Registers a reaction, or dispatches it right away if already settled.
    pub(crate) fn subscribe(&self, reaction: Reaction<T, E>) {
        let outcome = {
            let mut inner = self.inner.lock();
            match inner.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    inner.reactions.push(reaction);
                    return;
                }
            }
        };
        dispatch(
            Drained {
                reactions: vec![reaction],
                wakers: vec![],
            },
            outcome,
        );
    }

    /// The resolution procedure.
    pub(crate) fn resolve(self: &Arc<Self>, candidate: Settle<T, E>) -> Result<(), Error> {
        match candidate {
            Ok(Resolution::Value(value)) => self.settle(Ok(value)),
            Ok(Resolution::Promise(promise)) => self.adopt(promise.shared),
            Ok(Resolution::Thenable(thenable)) => self.adopt_thenable(thenable),
            Err(reason) => self.settle(Err(reason)),
        }
    }

    pub(crate) fn settle(&self, outcome: Result<T, E>) -> Result<(), Error> {
        if self.try_settle(outcome) {
            Ok(())
        } else {
            self.refuse()
        }
    }

    /// Called when the last producer handle goes away.
    pub(crate) fn abandon(&self) {
        if self.try_settle(Err(E::from(Error::ProducerDropped))) {
            debug!(promise = self.label(), "producer dropped while pending");
        }
    }

    fn try_settle(&self, outcome: Result<T, E>) -> bool {
        let drained = {
            let mut inner = self.inner.lock();
            if inner.is_locked() {
                return false;
            }
            inner.finish(outcome.clone())
        };
        trace!(
            promise = self.label(),
            fulfilled = outcome.is_ok(),
            reactions = drained.reactions.len(),
            "settled"
        );
        dispatch(drained, outcome);
        true
    }

    /// Settles a locked-in promise with the outcome of what it adopted.
    fn settle_adopted(&self, outcome: Result<T, E>) {
        let drained = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return;
            }
            inner.finish(outcome.clone())
        };
        trace!(promise = self.label(), "settled by adoption");
        dispatch(drained, outcome);
    }

    fn refuse(&self) -> Result<(), Error> {
        match self.config.settle_policy() {
            SettlePolicy::Ignore => {
                debug!(promise = self.label(), "ignoring settlement of an already settled promise");
                Ok(())
            }
            SettlePolicy::Report => Err(Error::AlreadySettled),
        }
    }

    /// Locks the promise in, unless it is already settled or locked.
    fn lock_in(&self, adopting: Option<Weak<Self>>) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_locked() {
            return false;
        }
        inner.locked_in = true;
        inner.adopting = adopting;
        true
    }

    fn adopt(self: &Arc<Self>, target: Arc<Self>) -> Result<(), Error> {
        if Arc::ptr_eq(self, &target) {
            return self.settle(Err(E::from(Error::SelfResolution)));
        }
        let cycle = {
            let _graph = ADOPTION.lock();
            let root = Self::chain_root(&target);
            if Arc::ptr_eq(&root, self) {
                true
            } else if self.lock_in(Some(Arc::downgrade(&root))) {
                false
            } else {
                return self.refuse();
            }
        };
        if cycle {
            return self.settle(Err(E::from(Error::ResolutionCycle)));
        }
        debug!(promise = self.label(), adopting = target.label(), "waiting on inner promise");
        target.subscribe(Reaction::Adopt(Arc::clone(self)));
        Ok(())
    }

    /// The last link of the adoption chain starting at `start`. Every link
    /// visited on the way is pointed straight at it, so repeated walks over
    /// a growing chain stay short.
    ///
    /// Only called with [`ADOPTION`] held. A pending promise that isn't
    /// adopting anything can only begin to while holding it too, so the
    /// result cannot go stale before the caller links to it.
    fn chain_root(start: &Arc<Self>) -> Arc<Self> {
        let mut path = vec![];
        let mut current = Arc::clone(start);
        loop {
            let next = current.inner.lock().adopting.as_ref().and_then(Weak::upgrade);
            match next {
                Some(next) => path.push(std::mem::replace(&mut current, next)),
                None => break,
            }
        }
        for link in path {
            let mut inner = link.inner.lock();
            if inner.adopting.is_some() {
                inner.adopting = Some(Arc::downgrade(&current));
            }
        }
        current
    }

    /// Adopts a foreign promise-like value. Its links are invisible, so no
    /// cycle detection happens here.
    fn adopt_thenable(self: &Arc<Self>, thenable: Box<dyn Thenable<T, E>>) -> Result<(), Error> {
        if !self.lock_in(None) {
            return self.refuse();
        }
        debug!(promise = self.label(), "waiting on thenable");
        let callback = AdoptionCallback {
            adopter: Some(Arc::clone(self)),
        };
        let subscribed = panic::catch_unwind(AssertUnwindSafe(move || {
            thenable.subscribe(Box::new(move |outcome: Result<T, E>| callback.settle(outcome)))
        }));
        if let Err(payload) = subscribed {
            let message = panic_message(payload.as_ref());
            warn!(promise = self.label(), %message, "thenable panicked while subscribing");
            self.settle_adopted(Err(E::from(Error::HandlerPanicked(message))));
        }
        Ok(())
    }
}

/// The callback handed to a thenable. Dropping it uncalled rejects the
/// adopting promise.
struct AdoptionCallback<T: Value, E: Reason> {
    adopter: Option<Arc<Shared<T, E>>>,
}

impl<T: Value, E: Reason> AdoptionCallback<T, E> {
    fn settle(mut self, outcome: Result<T, E>) {
        if let Some(adopter) = self.adopter.take() {
            adopter.settle_adopted(outcome);
        }
    }
}

impl<T: Value, E: Reason> Drop for AdoptionCallback<T, E> {
    fn drop(&mut self) {
        let Some(adopter) = self.adopter.take() else {
            return;
        };
        let error = if thread::panicking() {
            Error::HandlerPanicked("thenable panicked before settling".to_string())
        } else {
            Error::ProducerDropped
        };
        debug!(promise = adopter.label(), %error, "thenable dropped its callback");
        adopter.settle_adopted(Err(E::from(error)));
    }
}

/// Wakes waiters and runs reactions for a settlement, then for every promise
/// that adopted it, and so on down the adoption chain.
fn dispatch<T: Clone, E: Clone>(drained: Drained<T, E>, outcome: Result<T, E>) {
    let mut queue = VecDeque::from([(drained, outcome)]);
    while let Some((Drained { reactions, wakers }, outcome)) = queue.pop_front() {
        for waker in wakers {
            waker.wake();
        }
        for reaction in reactions {
            match reaction {
                Reaction::Schedule(schedule) => schedule(outcome.clone()),
                Reaction::Adopt(adopter) => {
                    let mut inner = adopter.inner.lock();
                    if inner.outcome.is_some() {
                        continue;
                    }
                    let drained = inner.finish(outcome.clone());
                    drop(inner);
                    trace!(promise = adopter.label(), "settled by adoption");
                    queue.push_back((drained, outcome.clone()));
                }
            }
        }
    }
}
