//! Execution contexts decide where promise handlers run.
//!
//! The core only needs "submit this job, run it later". [`Context`] is the
//! cloneable handle the chaining operator takes; anything implementing
//! [`ExecutionContext`] can sit behind it.
use futures::executor::ThreadPool;
use parking_lot::Mutex;
use std::{
    borrow::Cow,
    collections::VecDeque,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Sender},
        Arc, OnceLock,
    },
    thread,
};
use tracing::warn;

/// A unit of work submitted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run a [`Job`] at some later time, possibly on another
/// thread.
///
/// Implementations must not run the job before `execute` returns. A job that
/// cannot be run should be dropped; promises waiting on it are then rejected
/// with [`Error::ProducerDropped`](crate::Error::ProducerDropped).
pub trait ExecutionContext: Send + Sync + 'static {
    fn execute(&self, job: Job);
}

/// Cloneable, labelled handle to an [`ExecutionContext`].
#[derive(Clone)]
pub struct Context {
    label: Cow<'static, str>,
    executor: Arc<dyn ExecutionContext>,
}

impl Context {
    pub fn new(label: impl Into<Cow<'static, str>>, executor: impl ExecutionContext) -> Self {
        Self {
            label: label.into(),
            executor: Arc::new(executor),
        }
    }

    /// Wraps a closure that accepts jobs, e.g. a handle onto an existing
    /// runtime.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::Context;
    /// use std::thread;
    /// let context = Context::from_fn("detached", |job| {
    ///     thread::spawn(job);
    /// });
    /// assert_eq!(context.label(), "detached");
    /// ```
    pub fn from_fn<F>(label: impl Into<Cow<'static, str>>, submit: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        Self::new(label, FnContext(submit))
    }

    /// A serial context: one dedicated worker thread running jobs in the
    /// order they were submitted.
    pub fn serial(label: impl Into<Cow<'static, str>>) -> io::Result<Self> {
        let label = label.into();
        let queue = SerialQueue::new(&label)?;
        Ok(Self::new(label, queue))
    }

    /// A concurrent context that starts a fresh thread for every job.
    pub fn spawn() -> Self {
        Self::new("spawn", NewThread)
    }

    /// A concurrent context backed by a `futures` thread pool.
    pub fn thread_pool(pool: ThreadPool) -> Self {
        Self::new("thread-pool", pool)
    }

    /// The process-wide main context, a serial queue started on first use.
    ///
    /// This is the default context of [`Config`](crate::Config). If its
    /// worker thread cannot be started, jobs fall back to one thread each.
    pub fn main() -> Self {
        static MAIN: OnceLock<Context> = OnceLock::new();
        MAIN.get_or_init(|| {
            Context::serial("promise-main").unwrap_or_else(|err| {
                warn!(%err, "failed to start main promise queue, spawning a thread per job");
                Context::spawn()
            })
        })
        .clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn execute(&self, job: Job) {
        self.executor.execute(job)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("label", &self.label).finish()
    }
}

struct FnContext<F>(F);

impl<F> ExecutionContext for FnContext<F>
where
    F: Fn(Job) + Send + Sync + 'static,
{
    fn execute(&self, job: Job) {
        (self.0)(job)
    }
}

/// Runs a job, keeping the calling worker alive if it panics.
fn run_job(label: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!(context = label, "job panicked");
    }
}

/// A worker thread fed through an mpsc channel. The worker exits once every
/// sender is gone.
#[derive(Debug)]
struct SerialQueue {
    sender: Sender<Job>,
}

impl SerialQueue {
    fn new(label: &str) -> io::Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let name = label.to_owned();
        thread::Builder::new()
            .name(label.to_owned())
            .spawn(move || {
                for job in receiver {
                    run_job(&name, job);
                }
            })?;
        Ok(Self { sender })
    }
}

impl ExecutionContext for SerialQueue {
    fn execute(&self, job: Job) {
        // The worker only goes away if it was torn down; the job is dropped.
        if self.sender.send(job).is_err() {
            warn!("serial queue worker is gone, dropping job");
        }
    }
}

struct NewThread;

impl ExecutionContext for NewThread {
    fn execute(&self, job: Job) {
        if let Err(err) = thread::Builder::new().spawn(move || run_job("spawn", job)) {
            warn!(%err, "failed to spawn thread for job");
        }
    }
}

impl ExecutionContext for ThreadPool {
    fn execute(&self, job: Job) {
        self.spawn_ok(async move { job() });
    }
}

/// A context whose jobs only run when the owner drains it.
///
/// Useful for deterministic tests and for embedding promise handlers in an
/// existing loop.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Error, JobQueue, Promise};
/// let queue = JobQueue::new();
/// let context = queue.context("manual");
/// let promise = Promise::<i32, Error>::fulfilled(1).map(Some(&context), |v| v + 1);
/// assert!(promise.is_pending());
/// assert_eq!(queue.run_until_idle(), 1);
/// assert_eq!(promise.value(), Some(2));
/// ```
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self, label: impl Into<Cow<'static, str>>) -> Context {
        Context::new(label, self.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Runs the oldest queued job. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        // Release the lock first: the job may submit more jobs.
        let job = self.jobs.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs jobs until the queue is empty, including jobs queued by the jobs
    /// themselves, and returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl ExecutionContext for JobQueue {
    fn execute(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len()).finish()
    }
}
