//! Error types for the scheduler.

use std::time::Duration;

use slotbook_auth::AuthError;
use slotbook_client::ApiError;
use slotbook_store::StoreError;
use thiserror::Error;

use crate::JobId;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found, or owned by someone other than the caller.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// `init` was called more than once.
    #[error("scheduler already started")]
    AlreadyStarted,

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The job could not be created.
    #[error("invalid job: {0}")]
    Job(#[from] JobError),
}

/// Errors produced while creating or executing a single job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The payload has no execution logic in this build.
    #[error("unsupported job type")]
    Unsupported,

    /// No authenticated identity to own the job.
    #[error("no authenticated identity")]
    Unauthenticated,

    /// Could not obtain a session for the job's owner.
    #[error("authenticate: {0}")]
    Authentication(#[from] AuthError),

    /// The booking platform rejected the booking.
    #[error("book activity: {0}")]
    Booking(#[from] ApiError),

    /// The attempt exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl JobError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unsupported | Self::Unauthenticated)
    }
}
