//! Server implementation - lifecycle, worker pool and scheduled-job runners

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::registry::RegistryMap;

use super::handler::MessageHandler;
use super::job::ScheduledJob;
use super::message::Message;
use super::options::ServerOptions;
use super::stats::{ServerStats, StatsCounters};

/// Length of generated names for servers created without one
const GENERATED_NAME_LEN: usize = 16;

/// Default number of message workers per logical CPU
pub const DEFAULT_WORKERS_PER_CPU: usize = 2;

/// Observable lifecycle state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Created, never started
    Idle,
    Started,
    /// Stopped after running; terminal
    Stopped,
}

/// Stop signal and task handle for one worker or job runner
struct Unit {
    stop_tx: Option<oneshot::Sender<()>>,
    stop_rx: Option<oneshot::Receiver<()>>,
    task: Option<JoinHandle<()>>,
}

/// Stop signal and task handle taken out of a unit at stop time
type UnitHandles = (Option<oneshot::Sender<()>>, Option<JoinHandle<()>>);

impl Unit {
    fn new() -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        Self {
            stop_tx: Some(stop_tx),
            stop_rx: Some(stop_rx),
            task: None,
        }
    }
}

struct Lifecycle {
    phase: Phase,
    workers: Vec<Unit>,
    jobs: Vec<Unit>,
    /// Task ids of every spawned unit, kept after stop takes the handles
    unit_ids: Vec<task::Id>,
}

impl Lifecycle {
    fn take_handles(units: &mut [Unit]) -> Vec<UnitHandles> {
        units
            .iter_mut()
            .map(|unit| (unit.stop_tx.take(), unit.task.take()))
            .collect()
    }
}

struct ServerInner<P, R> {
    name: String,
    options: ServerOptions,
    handler: Option<Arc<dyn MessageHandler<P, R>>>,
    jobs: Vec<ScheduledJob>,
    tx: async_channel::Sender<Message<P, R>>,
    rx: async_channel::Receiver<Message<P, R>>,
    lifecycle: Mutex<Lifecycle>,
    stopped: CancellationToken,
    stats: StatsCounters,
    registry: Option<Weak<RegistryMap<P, R>>>,
}

/// A named unit owning a bounded queue, a worker pool and scheduled jobs
///
/// `Server` is a cheap-to-clone handle; every clone addresses the same
/// queue and workers. Servers are created stopped and must be started
/// exactly once from within a Tokio runtime.
pub struct Server<P, R> {
    inner: Arc<ServerInner<P, R>>,
}

impl<P, R> Clone for Server<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P, R> fmt::Debug for Server<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("workers", &self.worker_count())
            .field("jobs", &self.inner.jobs.len())
            .finish()
    }
}

/// Generate a random URL-safe server name
pub(crate) fn generate_name() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(GENERATED_NAME_LEN)
        .map(char::from)
        .collect()
}

/// Use `name` as given, or a generated one when it is empty
pub(crate) fn resolve_name(name: &str) -> String {
    if name.is_empty() {
        let generated = generate_name();
        debug!(%generated, "resolve_name: empty name, generated one");
        generated
    } else {
        name.to_string()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<P, R> Server<P, R> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock_lifecycle().workers.len()
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn state(&self) -> ServerState {
        match self.inner.lock_lifecycle().phase {
            Phase::Started => ServerState::Started,
            Phase::Idle | Phase::Stopped => ServerState::Stopped,
        }
    }

    /// Number of messages waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.inner.rx.len()
    }

    pub fn stats(&self) -> ServerStats {
        self.inner.stats.snapshot()
    }

    /// Wait until this server has been stopped
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await;
    }

    pub(crate) fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<P, R> Server<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Create a standalone server (not held by any registry)
    pub fn new<H>(name: &str, handler: H, jobs: Vec<ScheduledJob>, options: ServerOptions) -> DispatchResult<Self>
    where
        H: MessageHandler<P, R>,
    {
        Self::build(
            resolve_name(name),
            Some(Arc::new(handler)),
            jobs,
            options,
            DEFAULT_WORKERS_PER_CPU,
            None,
        )
    }

    /// Create a standalone server that only runs scheduled jobs
    ///
    /// Such a server has no workers; sent messages stay queued.
    pub fn without_handler(name: &str, jobs: Vec<ScheduledJob>, options: ServerOptions) -> DispatchResult<Self> {
        Self::build(resolve_name(name), None, jobs, options, DEFAULT_WORKERS_PER_CPU, None)
    }

    pub(crate) fn build(
        name: String,
        handler: Option<Arc<dyn MessageHandler<P, R>>>,
        jobs: Vec<ScheduledJob>,
        options: ServerOptions,
        workers_per_cpu: usize,
        registry: Option<Weak<RegistryMap<P, R>>>,
    ) -> DispatchResult<Self> {
        debug!(%name, ?options, jobs = jobs.len(), "Server::build: called");
        options.validate()?;

        let worker_count = options.worker_count(handler.is_some(), workers_per_cpu);
        let (tx, rx) = async_channel::bounded(options.queue_capacity);
        let lifecycle = Lifecycle {
            phase: Phase::Idle,
            workers: (0..worker_count).map(|_| Unit::new()).collect(),
            jobs: (0..jobs.len()).map(|_| Unit::new()).collect(),
            unit_ids: Vec::new(),
        };

        Ok(Self {
            inner: Arc::new(ServerInner {
                name,
                options,
                handler,
                jobs,
                tx,
                rx,
                lifecycle: Mutex::new(lifecycle),
                stopped: CancellationToken::new(),
                stats: StatsCounters::default(),
                registry,
            }),
        })
    }

    /// Launch every worker and job runner, then mark the server started
    ///
    /// Must be called from within a Tokio runtime, otherwise it fails with
    /// `NoRuntime`. A second call fails with `AlreadyStarted`; starting a
    /// server that has been stopped fails with `Stopped`.
    pub fn start(&self) -> DispatchResult<()> {
        debug!(server = %self.inner.name, "Server::start: called");
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DispatchError::NoRuntime {
                name: self.inner.name.clone(),
            });
        }
        let mut lifecycle = self.inner.lock_lifecycle();
        match lifecycle.phase {
            Phase::Idle => {}
            Phase::Started => {
                return Err(DispatchError::AlreadyStarted {
                    name: self.inner.name.clone(),
                });
            }
            Phase::Stopped => return Err(self.inner.stopped_error()),
        }

        let mut unit_ids = Vec::new();
        for (index, unit) in lifecycle.workers.iter_mut().enumerate() {
            if let Some(stop_rx) = unit.stop_rx.take() {
                let handle = tokio::spawn(run_worker(self.inner.clone(), index, stop_rx));
                unit_ids.push(handle.id());
                unit.task = Some(handle);
            }
        }
        for (index, unit) in lifecycle.jobs.iter_mut().enumerate() {
            if let Some(stop_rx) = unit.stop_rx.take() {
                let handle = tokio::spawn(run_job(self.inner.clone(), index, stop_rx));
                unit_ids.push(handle.id());
                unit.task = Some(handle);
            }
        }
        lifecycle.unit_ids = unit_ids;

        lifecycle.phase = Phase::Started;
        info!(
            server = %self.inner.name,
            workers = lifecycle.workers.len(),
            jobs = lifecycle.jobs.len(),
            "Server started"
        );
        Ok(())
    }

    /// Stop every worker and job runner, close the queue and deregister
    ///
    /// A no-op unless the server has been started. The first call hands the
    /// teardown to a background task, so dropping this future part way
    /// through does not leave the server half stopped. Every call then waits
    /// until that teardown has finished, except a call made from one of the
    /// server's own workers or jobs, which returns at once since the unit
    /// it runs on can only exit after it returns.
    ///
    /// Each unit is signalled once and awaited until it has accepted the
    /// signal, which happens between handler invocations. Sync requests
    /// still queued are failed with `Stopped`.
    pub async fn stop(&self) {
        debug!(server = %self.inner.name, "Server::stop: called");
        let own_unit = {
            let mut lifecycle = self.inner.lock_lifecycle();
            match lifecycle.phase {
                Phase::Idle => {
                    debug!(server = %self.inner.name, "Server::stop: not started, nothing to do");
                    return;
                }
                Phase::Started => {
                    lifecycle.phase = Phase::Stopped;
                    let workers = Lifecycle::take_handles(&mut lifecycle.workers);
                    let jobs = Lifecycle::take_handles(&mut lifecycle.jobs);
                    tokio::spawn(self.inner.clone().teardown(workers, jobs));
                }
                Phase::Stopped => {}
            }
            task::try_id().is_some_and(|id| lifecycle.unit_ids.contains(&id))
        };

        if own_unit {
            debug!(server = %self.inner.name, "Server::stop: called from own unit, not waiting");
            return;
        }
        self.inner.stopped.cancelled().await;
    }

    /// Queue a payload without waiting for it to be handled
    ///
    /// Waits while the queue is full, unless `ctx` ends first.
    pub async fn send_async(&self, ctx: &Context, payload: P) -> DispatchResult<()> {
        debug!(server = %self.inner.name, "Server::send_async: called");
        self.inner.ensure_started()?;
        let msg = Message::cast(ctx.clone(), payload);
        self.inner.push(ctx, msg).await
    }

    /// Queue a payload and wait for the handler's result
    ///
    /// If `ctx` ends first the call returns the context's error and the
    /// eventual result is discarded by the worker.
    pub async fn send_sync(&self, ctx: &Context, payload: P) -> DispatchResult<R> {
        debug!(server = %self.inner.name, "Server::send_sync: called");
        self.inner.ensure_started()?;
        let (msg, reply_rx) = Message::call(ctx.clone(), payload);
        let id = msg.id;
        self.inner.push(ctx, msg).await?;

        tokio::select! {
            biased;
            reply = reply_rx => reply.unwrap_or_else(|_| Err(self.inner.stopped_error())),
            reason = ctx.done() => {
                debug!(server = %self.inner.name, %id, %reason, "Server::send_sync: caller gave up, abandoning reply");
                Err(reason)
            }
        }
    }
}

impl<P, R> ServerInner<P, R> {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stopped_error(&self) -> DispatchError {
        DispatchError::Stopped {
            name: self.name.clone(),
        }
    }
}

impl<P, R> ServerInner<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    async fn teardown(self: Arc<Self>, workers: Vec<UnitHandles>, jobs: Vec<UnitHandles>) {
        for (index, (stop_tx, task)) in workers.into_iter().enumerate() {
            self.signal_unit("worker", index, stop_tx, task).await;
        }
        for (index, (stop_tx, task)) in jobs.into_iter().enumerate() {
            self.signal_unit("job", index, stop_tx, task).await;
        }

        self.tx.close();
        let mut released = 0;
        while let Ok(mut msg) = self.rx.try_recv() {
            if msg.respond(Err(self.stopped_error())) {
                released += 1;
            }
        }

        self.deregister();
        self.stopped.cancel();
        info!(server = %self.name, released, "Server stopped");
    }

    /// Remove this server's entry from its registry, if the entry is still ours
    fn deregister(self: &Arc<Self>) {
        let Some(map) = self.registry.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
        let ours = map
            .get(&self.name)
            .is_some_and(|entry| Arc::ptr_eq(&entry.inner, self));
        if ours {
            map.remove(&self.name);
            debug!(server = %self.name, "ServerInner::deregister: removed from registry");
        }
    }

    fn ensure_started(&self) -> DispatchResult<()> {
        if self.lock_lifecycle().phase == Phase::Started {
            Ok(())
        } else {
            Err(self.stopped_error())
        }
    }

    async fn push(&self, ctx: &Context, msg: Message<P, R>) -> DispatchResult<()> {
        tokio::select! {
            biased;
            sent = self.tx.send(msg) => {
                // A closed queue means stop() won the race
                sent.map_err(|_| self.stopped_error())?;
            }
            reason = ctx.done() => {
                debug!(server = %self.name, %reason, "push: context ended while queue full");
                return Err(reason);
            }
        }
        self.stats.record_enqueued();
        Ok(())
    }

    async fn signal_unit(
        &self,
        kind: &str,
        index: usize,
        stop_tx: Option<oneshot::Sender<()>>,
        task: Option<JoinHandle<()>>,
    ) {
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(server = %self.name, kind, index, error = %e, "Unit did not exit cleanly");
            }
        }
    }

    /// Keep only the newest queued message, failing superseded sync senders
    fn coalesce(&self, mut latest: Message<P, R>) -> Message<P, R> {
        while let Ok(newer) = self.rx.try_recv() {
            let mut superseded = std::mem::replace(&mut latest, newer);
            superseded.respond(Err(DispatchError::Coalesced));
            self.stats.record_coalesced();
        }
        latest
    }

    async fn process(&self, handler: &dyn MessageHandler<P, R>, msg: Message<P, R>, worker: usize) {
        let Message { id, payload, ctx, reply } = msg;
        let outcome = AssertUnwindSafe(handler.handle(ctx, payload, worker))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(report)) => {
                self.stats.record_handler_error();
                Err(DispatchError::Handler(report))
            }
            Err(panic) => {
                self.stats.record_panic();
                let message = panic_message(panic.as_ref());
                warn!(server = %self.name, %id, worker, %message, "Handler panicked");
                Err(DispatchError::HandlerPanicked { worker, message })
            }
        };

        match reply {
            Some(reply) => {
                if reply.send(result).is_err() {
                    self.stats.record_abandoned_reply();
                    debug!(server = %self.name, %id, worker, "process: reply abandoned by caller");
                }
            }
            None => {
                if let Err(DispatchError::Handler(report)) = &result {
                    warn!(server = %self.name, %id, worker, error = %report, "Async message failed");
                }
            }
        }
        self.stats.record_processed();
    }

    async fn run_job_once(&self, job: &ScheduledJob, index: usize) {
        let run = async { job.invoke(index).await };
        if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
            self.stats.record_panic();
            let message = panic_message(panic.as_ref());
            warn!(server = %self.name, job = index, %message, "Scheduled job panicked");
        }
        self.stats.record_job_run();
    }
}

async fn run_worker<P, R>(inner: Arc<ServerInner<P, R>>, index: usize, mut stop_rx: oneshot::Receiver<()>)
where
    P: Send + 'static,
    R: Send + 'static,
{
    debug!(server = %inner.name, worker = index, "run_worker: started");
    let Some(handler) = inner.handler.clone() else {
        return;
    };

    loop {
        let msg = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            received = inner.rx.recv() => match received {
                Ok(msg) => msg,
                Err(_) => break,
            },
        };
        let msg = if inner.options.coalesce { inner.coalesce(msg) } else { msg };
        inner.process(handler.as_ref(), msg, index).await;
    }
    debug!(server = %inner.name, worker = index, "run_worker: exiting");
}

async fn run_job<P, R>(inner: Arc<ServerInner<P, R>>, index: usize, mut stop_rx: oneshot::Receiver<()>)
where
    P: Send + 'static,
    R: Send + 'static,
{
    let job = inner.jobs[index].clone();
    let interval = job.interval();
    debug!(server = %inner.name, job = index, ?interval, "run_job: started");

    inner.run_job_once(&job, index).await;
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = wait_interval(interval) => inner.run_job_once(&job, index).await,
        }
    }
    debug!(server = %inner.name, job = index, "run_job: exiting");
}

async fn wait_interval(interval: std::time::Duration) {
    if interval.is_zero() {
        // Re-trigger immediately but still let other tasks run
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}
