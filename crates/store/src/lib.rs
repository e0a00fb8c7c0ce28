//! In-memory state for the task server: the task store (queue plus state
//! machine), the worker registry, and the on-disk file exchange.
//!
//! Everything here is interior-synchronized and shared as `Arc`s by the
//! HTTP handlers and the background sweeper. Nothing survives a restart;
//! recovery from worker crashes is the timeout sweep, not persistence.

pub mod exchange;
pub mod registry;
pub mod task_store;

pub use exchange::{FileExchange, FileWaitConfig};
pub use registry::ClientRegistry;
pub use task_store::{SweepReport, TaskStore};
