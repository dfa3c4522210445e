//! Server - a named bounded queue drained by a worker pool
//!
//! A server owns:
//! - **Queue:** bounded FIFO of messages, closed exactly once on stop
//! - **Workers:** tasks that pull messages and run the handler
//! - **Scheduled jobs:** tasks that re-run a callable on an interval

mod core;
mod handler;
mod job;
mod message;
mod options;
mod stats;

pub use self::core::{DEFAULT_WORKERS_PER_CPU, Server, ServerState};
pub(crate) use self::core::resolve_name;
pub use handler::MessageHandler;
pub use job::ScheduledJob;
pub use options::{DEFAULT_QUEUE_CAPACITY, ServerOptions};
pub use stats::ServerStats;
