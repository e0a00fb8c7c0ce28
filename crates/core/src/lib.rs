//! Domain types and pure policy logic for the shutterq task distribution
//! system.
//!
//! Everything in this crate is side-effect free: the task state machine
//! vocabulary, file reference and validation rules, the protocol DTOs
//! shared by server and agent, and the preset-complexity timeout
//! estimator. Stateful containers live in `shutterq-store`; network
//! surfaces live in `shutterq-api` and `shutterq-agent`.

pub mod client;
pub mod error;
pub mod estimation;
pub mod files;
pub mod protocol;
pub mod task;
pub mod types;
