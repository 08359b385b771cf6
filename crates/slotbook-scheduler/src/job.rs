//! Job execution.

use std::sync::Arc;

use slotbook_auth::Authenticator;
use slotbook_client::BookingApi;
use tracing::info;

use crate::{BookEventJob, Job, JobError, JobPayload};

/// Collaborators a job needs while running.
#[derive(Clone)]
pub struct JobRuntime {
    pub authenticator: Arc<dyn Authenticator>,
    pub api: Arc<dyn BookingApi>,
}

impl JobRuntime {
    pub fn new(authenticator: Arc<dyn Authenticator>, api: Arc<dyn BookingApi>) -> Self {
        Self { authenticator, api }
    }
}

impl Job {
    /// Run one attempt of this job.
    pub async fn execute(&self, runtime: &JobRuntime) -> Result<(), JobError> {
        match &self.payload {
            JobPayload::BookEvent(book) => book.execute(runtime).await,
            JobPayload::Unsupported => Err(JobError::Unsupported),
        }
    }
}

impl BookEventJob {
    async fn execute(&self, runtime: &JobRuntime) -> Result<(), JobError> {
        let session = runtime
            .authenticator
            .authenticate(&self.credentials_id)
            .await?;

        match runtime
            .api
            .book_activity(&session, self.event_id.as_str())
            .await
        {
            Ok(booking) => {
                info!(
                    event_id = %self.event_id,
                    booking_id = %booking.booking_id,
                    "booked event"
                );
                Ok(())
            }
            Err(e) if e.is_already_booked() => {
                info!(event_id = %self.event_id, "event already booked");
                Ok(())
            }
            Err(e) => Err(JobError::Booking(e)),
        }
    }
}
