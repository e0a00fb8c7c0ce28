//! Shutterq task server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! background sweeper) so integration tests and the binary entrypoint can
//! both access them.

pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;
