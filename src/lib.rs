//! Transform worker.
//!
//! Consumes records from source topics, applies the active transform
//! registered for each topic, and publishes the result to the transform's
//! target topic. Records that fail to parse or evaluate are routed to a
//! dead-letter topic with diagnostic context. Transform definitions are
//! reloaded periodically; new source topics are subscribed without a restart.

pub mod config;
pub mod consumption;
pub mod dlq;
pub mod expression;
pub mod processor;
pub mod registry;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use worker::{Worker, WorkerError};
