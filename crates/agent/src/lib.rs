//! `shutterq-agent` library crate.
//!
//! Re-exports internal modules for integration testing. The binary
//! entrypoint lives in `main.rs`.

pub mod api;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod poller;
pub mod processor;
pub mod runner;
