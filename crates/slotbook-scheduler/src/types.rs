//! Scheduler types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use slotbook_auth::{AuthContext, CredentialsId};

use crate::JobError;

/// Unique, immutable job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a bookable event (class slot) on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Current status of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its due time.
    #[default]
    Pending,
    /// An attempt is executing (or the process died during one).
    Running,
    /// The last attempt succeeded. Never executed again.
    Succeeded,
    /// The last attempt failed; retried until attempts run out.
    Failing,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failing => "failing",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What a job does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Book an event on behalf of its owner.
    BookEvent(BookEventJob),
    /// A kind this build cannot execute.
    #[serde(other)]
    Unsupported,
}

/// Book `event_id` using the session of `credentials_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEventJob {
    pub credentials_id: CredentialsId,
    pub event_id: EventId,
}

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// When the job becomes eligible to run; moved forward on retry.
    pub time: DateTime<Utc>,
    pub status: JobStatus,
    /// One timestamp per execution attempt.
    pub attempts: Vec<DateTime<Utc>>,
    /// One message per attempt, parallel to `attempts`. Empty on success.
    pub errors: Vec<String>,
    pub payload: JobPayload,
}

impl Job {
    /// Create a pending job booking `event_id` at `time`, owned by the
    /// caller's identity.
    pub fn book_event(
        ctx: &AuthContext,
        event_id: EventId,
        time: DateTime<Utc>,
    ) -> Result<Self, JobError> {
        let credentials_id = ctx.identity().ok_or(JobError::Unauthenticated)?.clone();
        Ok(Self::new(
            time,
            JobPayload::BookEvent(BookEventJob {
                credentials_id,
                event_id,
            }),
        ))
    }

    /// Create a pending job with any payload.
    pub fn new(time: DateTime<Utc>, payload: JobPayload) -> Self {
        Self {
            id: JobId::generate(),
            time,
            status: JobStatus::Pending,
            attempts: Vec::new(),
            errors: Vec::new(),
            payload,
        }
    }

    /// The credentials this job acts for, if its payload has one.
    pub fn owner(&self) -> Option<&CredentialsId> {
        match &self.payload {
            JobPayload::BookEvent(book) => Some(&book.credentials_id),
            JobPayload::Unsupported => None,
        }
    }

    /// Check if this job is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.time <= now
    }

    /// True when no further attempt may be made.
    ///
    /// A job of an unsupported kind gets exactly one attempt.
    pub fn is_exhausted(&self, max_attempts: usize) -> bool {
        if self.payload == JobPayload::Unsupported && !self.attempts.is_empty() {
            return true;
        }
        self.attempts.len() >= max_attempts
    }

    /// Due time of the next retry, or `None` once attempts are exhausted.
    pub fn next_retry(
        &self,
        base_backoff: std::time::Duration,
        max_attempts: usize,
    ) -> Option<DateTime<Utc>> {
        if self.is_exhausted(max_attempts) {
            return None;
        }
        let delay = retry_delay(base_backoff, self.attempts.len());
        Some(
            self.time
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

/// Exponential backoff: `base * 2^attempts`, saturating.
pub fn retry_delay(base: std::time::Duration, attempts: usize) -> Duration {
    let factor = u32::try_from(attempts)
        .ok()
        .and_then(|n| 1u32.checked_shl(n))
        .unwrap_or(u32::MAX);
    Duration::from_std(base.saturating_mul(factor)).unwrap_or(Duration::MAX)
}
