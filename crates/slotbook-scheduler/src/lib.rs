//! Durable booking job scheduler for Slotbook.
//!
//! This crate provides a persistent scheduler that:
//! - Stores job state in the embedded key-value store
//! - Reloads outstanding jobs after a crash or restart
//! - Books events on behalf of their owners when jobs come due
//! - Retries failed attempts with exponential backoff up to a bound

mod config;
mod error;
mod job;
mod scheduler;
mod store;
mod types;

pub use config::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BASE_BACKOFF, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_TICK_INTERVAL, SchedulerConfig,
};
pub use error::{JobError, SchedulerError};
pub use job::JobRuntime;
pub use scheduler::{JobObserver, Scheduler};
pub use store::{JobFilter, JobStore};
pub use types::{BookEventJob, EventId, Job, JobId, JobPayload, JobStatus, retry_delay};
