//! Message - the unit of work queued into a server

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::context::Context;
use crate::error::DispatchResult;

/// Single-slot reply channel for synchronous sends
///
/// The worker's send never blocks: if the caller has given up and dropped
/// the receiving side, the value is simply discarded.
pub(crate) type ReplySlot<R> = oneshot::Sender<DispatchResult<R>>;

/// A queued payload with its context and, for sync sends, a reply slot
pub(crate) struct Message<P, R> {
    pub id: Uuid,
    pub payload: P,
    pub ctx: Context,
    pub reply: Option<ReplySlot<R>>,
}

impl<P, R> Message<P, R> {
    /// Fire-and-forget message
    pub fn cast(ctx: Context, payload: P) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            ctx,
            reply: None,
        }
    }

    /// Request/response message and the receiver its result arrives on
    pub fn call(ctx: Context, payload: P) -> (Self, oneshot::Receiver<DispatchResult<R>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = Self {
            id: Uuid::now_v7(),
            payload,
            ctx,
            reply: Some(reply_tx),
        };
        (msg, reply_rx)
    }

    /// Deliver a result to a synchronous sender, if there is one listening
    ///
    /// Returns `false` when there was no reply slot or the caller abandoned it.
    pub fn respond(&mut self, result: DispatchResult<R>) -> bool {
        match self.reply.take() {
            Some(reply) => reply.send(result).is_ok(),
            None => false,
        }
    }
}
