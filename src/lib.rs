pub mod commands;
pub mod config;
pub mod http;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod staleness;
pub mod state;
pub mod tracker;
pub mod upstream;
