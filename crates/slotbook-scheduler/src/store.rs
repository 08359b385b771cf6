//! Durable job persistence.

use std::collections::HashSet;
use std::sync::Arc;

use slotbook_auth::CredentialsId;
use slotbook_store::{KvOp, KvStore, StoreError, get_json};
use tracing::warn;

use crate::{EventId, Job, JobId, JobPayload, JobStatus, SchedulerError};

const ID_PREFIX: &str = "jobs/id/";

/// A predicate over stored jobs. Filters passed together must all hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFilter {
    /// Status is one of these.
    Status(HashSet<JobStatus>),
    /// Books one of `event_ids` for `credentials_id`.
    BookEvents {
        credentials_id: CredentialsId,
        event_ids: HashSet<EventId>,
    },
    /// Owned by these credentials.
    Owner(CredentialsId),
    /// Status is anything but `Succeeded`.
    ExcludeSucceeded,
    /// Fewer than `max_attempts` attempts have been made.
    ExcludeExhausted { max_attempts: usize },
}

impl JobFilter {
    pub fn status(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self::Status(statuses.into_iter().collect())
    }

    pub fn book_events(
        credentials_id: CredentialsId,
        event_ids: impl IntoIterator<Item = EventId>,
    ) -> Self {
        Self::BookEvents {
            credentials_id,
            event_ids: event_ids.into_iter().collect(),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Self::Status(statuses) => statuses.contains(&job.status),
            Self::BookEvents {
                credentials_id,
                event_ids,
            } => match &job.payload {
                JobPayload::BookEvent(book) => {
                    &book.credentials_id == credentials_id && event_ids.contains(&book.event_id)
                }
                JobPayload::Unsupported => false,
            },
            Self::Owner(owner) => job.owner() == Some(owner),
            Self::ExcludeSucceeded => job.status != JobStatus::Succeeded,
            Self::ExcludeExhausted { max_attempts } => !job.is_exhausted(*max_attempts),
        }
    }
}

/// Jobs persisted under `jobs/id/{id}`, with book-event jobs also copied to
/// `jobs/book_event/{credentials_id}/{event_id}`.
///
/// The secondary entry is a full snapshot rather than a pointer, so it is
/// rewritten on every insert and always reflects the latest job for that
/// owner and event.
#[derive(Clone)]
pub struct JobStore {
    kv: Arc<dyn KvStore>,
}

impl JobStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Insert or replace a job under both of its keys atomically.
    pub fn insert(&self, job: &Job) -> Result<(), SchedulerError> {
        self.kv.batch(write_ops(job)?)?;
        Ok(())
    }

    /// Overwrite a job only while its record still exists.
    ///
    /// Returns false, writing nothing, once the job has been deleted.
    pub fn replace(&self, job: &Job) -> Result<bool, SchedulerError> {
        let primary = id_key(&job.id);
        let mut stored = false;
        self.kv.update(&mut |kv| {
            stored = kv.get(&primary)?.is_some();
            if !stored {
                return Ok(Vec::new());
            }
            write_ops(job)
        })?;
        Ok(stored)
    }

    pub fn find_by_id(&self, id: &JobId) -> Result<Job, SchedulerError> {
        get_json(self.kv.as_ref(), &id_key(id))?.ok_or_else(|| SchedulerError::NotFound(id.clone()))
    }

    /// Latest job booking `event_id` for `credentials_id`.
    pub fn find_book_event(
        &self,
        credentials_id: &CredentialsId,
        event_id: &EventId,
    ) -> Result<Option<Job>, SchedulerError> {
        Ok(get_json(
            self.kv.as_ref(),
            &book_event_key(credentials_id, event_id),
        )?)
    }

    /// All jobs matching every filter, ordered by ID.
    ///
    /// Records that no longer decode are logged and skipped.
    pub fn list(&self, filters: &[JobFilter]) -> Result<Vec<Job>, SchedulerError> {
        let mut jobs = Vec::new();
        for (key, value) in self.kv.scan_prefix(ID_PREFIX)? {
            let job: Job = match serde_json::from_slice(&value) {
                Ok(job) => job,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable job record");
                    continue;
                }
            };
            if filters.iter().all(|f| f.matches(&job)) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Remove a job. The book-event entry goes too while it still belongs
    /// to this job. Removing an absent job is a no-op.
    ///
    /// The ownership check of the book-event entry and the deletes happen in
    /// one store update, so a newer job inserted concurrently keeps its entry.
    pub fn delete(&self, id: &JobId) -> Result<(), SchedulerError> {
        let primary = id_key(id);
        self.kv.update(&mut |kv| {
            let Some(raw) = kv.get(&primary)? else {
                return Ok(Vec::new());
            };
            let job: Job = serde_json::from_slice(&raw)?;

            let mut ops = vec![KvOp::delete(primary.clone())];
            if let JobPayload::BookEvent(book) = &job.payload {
                let key = book_event_key(&book.credentials_id, &book.event_id);
                if let Some(raw) = kv.get(&key)? {
                    let latest: Job = serde_json::from_slice(&raw)?;
                    if &latest.id == id {
                        ops.push(KvOp::delete(key));
                    }
                }
            }
            Ok(ops)
        })?;
        Ok(())
    }
}

fn write_ops(job: &Job) -> Result<Vec<KvOp>, StoreError> {
    let data = serde_json::to_vec(job)?;
    let mut ops = vec![KvOp::put(id_key(&job.id), data.clone())];
    if let JobPayload::BookEvent(book) = &job.payload {
        ops.push(KvOp::put(
            book_event_key(&book.credentials_id, &book.event_id),
            data,
        ));
    }
    Ok(ops)
}

fn id_key(id: &JobId) -> String {
    format!("{}{}", ID_PREFIX, id)
}

fn book_event_key(credentials_id: &CredentialsId, event_id: &EventId) -> String {
    format!("jobs/book_event/{}/{}", credentials_id, event_id)
}
