//! Process-wide registry
//!
//! A single registry of JSON-typed servers that lives for the whole process.
//! Prefer passing an explicit [`Registry`] where the caller can; this exists
//! for components that only know a server's name.

use std::sync::OnceLock;

use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::registry::Registry;
use crate::server::{MessageHandler, ScheduledJob, Server, ServerOptions};

/// Registry type held process-wide
pub type GlobalRegistry = Registry<Value, Value>;

static REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

/// The process-wide registry, created on first use
pub fn registry() -> &'static GlobalRegistry {
    REGISTRY.get_or_init(|| {
        debug!("global::registry: initializing");
        Registry::new()
    })
}

/// Create and register a server in the process-wide registry
pub fn new_server<H>(
    name: &str,
    handler: H,
    jobs: Vec<ScheduledJob>,
    options: ServerOptions,
) -> DispatchResult<Server<Value, Value>>
where
    H: MessageHandler<Value, Value>,
{
    registry().create(name, handler, jobs, options)
}

pub fn get_server(name: &str) -> DispatchResult<Server<Value, Value>> {
    registry().get(name)
}

pub async fn stop_server(name: &str) -> DispatchResult<()> {
    registry().stop(name).await
}

pub async fn send_async(name: &str, ctx: &Context, payload: Value) -> DispatchResult<()> {
    registry().send_async(name, ctx, payload).await
}

pub async fn send_sync(name: &str, ctx: &Context, payload: Value) -> DispatchResult<Value> {
    registry().send_sync(name, ctx, payload).await
}

pub fn server_count() -> usize {
    registry().count()
}

pub async fn stop_all() {
    registry().stop_all().await
}
