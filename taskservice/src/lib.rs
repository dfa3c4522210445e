//! taskservice - named in-process task dispatch
//!
//! Callers register a named **server** backed by a bounded queue, a pool of
//! workers running a handler, and optional scheduled jobs. Work is then
//! pushed by name, either fire-and-forget or request/response with
//! cancellation.
//!
//! # Modules
//!
//! - [`server`] - Server lifecycle, worker pool, scheduled jobs
//! - [`registry`] - Name-keyed directory of servers
//! - [`global`] - Process-wide registry
//! - [`context`] - Cancellation and deadline carrier
//! - [`error`] - Dispatch error taxonomy
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod global;
pub mod registry;
pub mod server;

// Re-export commonly used types
pub use config::{Config, DispatchConfig};
pub use context::Context;
pub use error::{DispatchError, DispatchResult};
pub use registry::Registry;
pub use server::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS_PER_CPU, MessageHandler, ScheduledJob, Server, ServerOptions,
    ServerState, ServerStats,
};
