//! MessageHandler trait - the work a server's workers perform

use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;

/// Processes one message on behalf of a server
///
/// `worker` is the index of the worker running this invocation, in
/// `0..worker_count`. Errors are reported back to synchronous senders
/// verbatim and logged for asynchronous ones.
#[async_trait]
pub trait MessageHandler<P, R>: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, payload: P, worker: usize) -> eyre::Result<R>;
}

#[async_trait]
impl<P, R, F, Fut> MessageHandler<P, R> for F
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(Context, P, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<R>> + Send + 'static,
{
    async fn handle(&self, ctx: Context, payload: P, worker: usize) -> eyre::Result<R> {
        (self)(ctx, payload, worker).await
    }
}
