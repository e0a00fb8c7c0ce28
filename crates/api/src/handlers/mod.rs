pub mod clients;
pub mod files;
pub mod stats;
pub mod tasks;
