//! Scheduled jobs - periodic work independent of the message queue

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

type JobFn = dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync;

/// A callable re-triggered every `interval` while its server runs
///
/// The callable receives the index of its runner. A zero interval
/// re-triggers immediately after each invocation.
#[derive(Clone)]
pub struct ScheduledJob {
    task: Arc<JobFn>,
    interval: Duration,
}

impl ScheduledJob {
    pub fn new<F, Fut>(interval: Duration, task: F) -> Self
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Arc::new(task);
        Self {
            // Call the closure inside the future so a panic surfaces on poll
            task: Arc::new(move |index: usize| -> BoxFuture<'static, ()> {
                let task = task.clone();
                Box::pin(async move { (*task)(index).await })
            }),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn invoke(&self, index: usize) -> BoxFuture<'static, ()> {
        (self.task)(index)
    }
}

impl fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledJob").field("interval", &self.interval).finish()
    }
}
