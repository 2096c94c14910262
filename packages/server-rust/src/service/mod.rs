//! Process configuration and the background worker abstraction.

pub mod config;
pub mod worker;

pub use config::ServerConfig;
pub use worker::{BackgroundRunnable, BackgroundWorker, SubmitError};
