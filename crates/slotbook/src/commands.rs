//! One-shot CLI commands operating on the store.
//!
//! These never start the tick loop. A running daemon picks up their
//! schedules and cancellations on its next tick.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use miette::Result;
use slotbook_auth::{AuthContext, Authenticator, CredentialsId};
use slotbook_client::{Event, ListEventsInput};
use slotbook_scheduler::{EventId, Job, JobFilter, JobId, JobPayload, Scheduler};

use crate::app::App;

/// Sign in and print the credentials ID to use with other commands.
pub async fn login(app: &App, login: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };

    let ctx = app
        .auth
        .sign_in(login, &password)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let id = ctx
        .identity()
        .ok_or_else(|| miette::miette!("sign in returned no identity"))?;
    println!("{}", id);
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    rpassword::read_password().map_err(|e| miette::miette!("failed to read password: {}", e))
}

/// Print the platform's activities in a date window, marking the ones the
/// caller has booked or scheduled.
pub async fn events(
    app: &App,
    credentials_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let ctx = signed_in(app, credentials_id)?;
    let owner = ctx
        .identity()
        .ok_or_else(|| miette::miette!("not signed in"))?;
    let session = app
        .auth
        .authenticate(owner)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let mut events = app
        .api
        .list_events(&session, &ListEventsInput { from, to })
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    events.sort_by(|a, b| a.start.cmp(&b.start));

    let scheduled = app
        .scheduler
        .list_jobs(&ctx, &[JobFilter::ExcludeSucceeded])
        .map_err(|e| miette::miette!("{}", e))?;

    if events.is_empty() {
        println!("No events.");
    }
    for line in event_lines(&events, &scheduled) {
        println!("{}", line);
    }
    Ok(())
}

/// One line per event, with the job scheduled to book it if any.
fn event_lines(events: &[Event], jobs: &[Job]) -> Vec<String> {
    let by_event: HashMap<&EventId, &Job> = jobs
        .iter()
        .filter_map(|job| match &job.payload {
            JobPayload::BookEvent(book) => Some((&book.event_id, job)),
            JobPayload::Unsupported => None,
        })
        .collect();

    events
        .iter()
        .map(|event| {
            let state = if let Some(booking) = &event.booking {
                format!("booked ({})", booking.status)
            } else if let Some(job) = by_event.get(&EventId::from(event.id.as_str())) {
                format!("scheduled {} at {}", job.id, job.time.to_rfc3339())
            } else if event.is_bookable() {
                format!("{} of {} free", event.places_total - event.places_taken, event.places_total)
            } else if event.is_reservable() {
                format!(
                    "{} of {} reserve spots free",
                    event.reserves_total - event.reserves_taken,
                    event.reserves_total
                )
            } else {
                "full".to_string()
            };
            format!(
                "{}  {}  {}  {}  opens {}  {}",
                event.id,
                event.start.format("%Y-%m-%d %H:%M"),
                event.name,
                event.trainer,
                event.bookable_from.format("%Y-%m-%d %H:%M"),
                state
            )
        })
        .collect()
}

/// Schedule a booking and print the job ID.
pub async fn schedule(app: &App, credentials_id: &str, event_id: &str, at: &str) -> Result<()> {
    let ctx = signed_in(app, credentials_id)?;
    let at = parse_time(at)?;
    let id = schedule_booking(&app.scheduler, &ctx, EventId::from(event_id), at).await?;
    println!("{}", id);
    Ok(())
}

/// Schedule a booking unless the caller already has a live job for the event.
pub async fn schedule_booking(
    scheduler: &Scheduler,
    ctx: &AuthContext,
    event_id: EventId,
    at: DateTime<Utc>,
) -> Result<JobId> {
    let owner = ctx
        .identity()
        .ok_or_else(|| miette::miette!("not signed in"))?;
    let live = scheduler
        .list_jobs(
            ctx,
            &[
                JobFilter::book_events(owner.clone(), [event_id.clone()]),
                JobFilter::ExcludeSucceeded,
                JobFilter::ExcludeExhausted {
                    max_attempts: scheduler.config().max_attempts,
                },
            ],
        )
        .map_err(|e| miette::miette!("{}", e))?;
    if let Some(existing) = live.first() {
        return Err(miette::miette!(
            "event {} already has a pending booking: {}",
            event_id,
            existing.id
        ));
    }

    let job = Job::book_event(ctx, event_id, at).map_err(|e| miette::miette!("{}", e))?;
    scheduler
        .schedule(job)
        .await
        .map_err(|e| miette::miette!("{}", e))
}

/// Print the caller's jobs, hiding succeeded ones unless `all`.
pub fn jobs(app: &App, credentials_id: &str, all: bool) -> Result<()> {
    let ctx = signed_in(app, credentials_id)?;
    let filters = if all {
        Vec::new()
    } else {
        vec![JobFilter::ExcludeSucceeded]
    };

    let mut jobs = app
        .scheduler
        .list_jobs(&ctx, &filters)
        .map_err(|e| miette::miette!("{}", e))?;
    jobs.sort_by(|a, b| a.time.cmp(&b.time));

    if jobs.is_empty() {
        println!("No jobs.");
    }
    for job in &jobs {
        println!("{}", format_job(job));
    }
    Ok(())
}

/// Delete one of the caller's jobs.
pub async fn cancel(app: &App, credentials_id: &str, job_id: &str) -> Result<()> {
    let ctx = signed_in(app, credentials_id)?;
    app.scheduler
        .delete_by_id(&ctx, &JobId::from(job_id))
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("Cancelled {}", job_id);
    Ok(())
}

/// Context for stored credentials. Unknown IDs are rejected.
fn signed_in(app: &App, credentials_id: &str) -> Result<AuthContext> {
    let credentials = app
        .credentials
        .find_by_id(&CredentialsId::from(credentials_id))
        .map_err(|e| miette::miette!("{}", e))?;
    Ok(AuthContext::authenticated(credentials.id))
}

fn parse_time(at: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| miette::miette!("invalid time {:?}: {}", at, e))
}

/// One line per job: ID, status, event, due time, attempts and last error.
fn format_job(job: &Job) -> String {
    let target = match &job.payload {
        JobPayload::BookEvent(book) => format!("event {}", book.event_id),
        JobPayload::Unsupported => "unsupported".to_string(),
    };
    let mut line = format!(
        "{}  {:<9}  {}  at {}  attempts {}",
        job.id,
        job.status,
        target,
        job.time.to_rfc3339(),
        job.attempts.len()
    );
    if let Some(error) = job.errors.last().filter(|e| !e.is_empty()) {
        line.push_str(&format!("  last error: {}", error));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use slotbook_auth::{Credentials, EncryptionKey};
    use slotbook_client::{
        ActivityBooking, ApiError, BookingApi, Event, ListEventsInput, LoginData, Session,
        SessionCookie,
    };
    use slotbook_scheduler::{JobStatus, SchedulerConfig};
    use slotbook_store::MemoryKv;

    struct OfflineApi;

    #[async_trait]
    impl BookingApi for OfflineApi {
        async fn login(&self, _data: &LoginData) -> Result<SessionCookie, ApiError> {
            Err(ApiError::InvalidLoginOrPassword)
        }

        async fn list_events(
            &self,
            _session: &Session,
            _input: &ListEventsInput,
        ) -> Result<Vec<Event>, ApiError> {
            Err(ApiError::InvalidLoginOrPassword)
        }

        async fn book_activity(
            &self,
            _session: &Session,
            _activity_id: &str,
        ) -> Result<ActivityBooking, ApiError> {
            Err(ApiError::BookingTooEarly)
        }

        async fn cancel_booking(&self, _session: &Session, _booking_id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn app() -> App {
        App::with_parts(
            Arc::new(MemoryKv::new()),
            Arc::new(OfflineApi),
            EncryptionKey::generate(),
            SchedulerConfig::default(),
        )
    }

    fn register(app: &App, id: &str) -> AuthContext {
        app.credentials
            .insert(&Credentials {
                id: CredentialsId::from(id),
                login: format!("{}@example.com", id),
                password: "secret".to_string(),
            })
            .unwrap();
        signed_in(app, id).unwrap()
    }

    fn tomorrow() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::days(1)
    }

    #[test]
    fn test_parse_time_accepts_offsets() {
        let t = parse_time("2024-03-01T09:30:00+01:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T08:30:00+00:00");
        assert!(parse_time("tomorrow").is_err());
    }

    #[test]
    fn test_unknown_credentials_rejected() {
        assert!(signed_in(&app(), "ghost").is_err());
    }

    #[tokio::test]
    async fn test_schedule_rejects_live_duplicate() {
        let app = app();
        let ctx = register(&app, "abc");

        schedule_booking(&app.scheduler, &ctx, EventId::from("42"), tomorrow())
            .await
            .unwrap();
        let second =
            schedule_booking(&app.scheduler, &ctx, EventId::from("42"), tomorrow()).await;

        assert!(second.is_err());
        assert_eq!(app.scheduler.list_jobs(&ctx, &[]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_allows_rebooking_after_cancel() {
        let app = app();
        let ctx = register(&app, "abc");

        let first = schedule_booking(&app.scheduler, &ctx, EventId::from("42"), tomorrow())
            .await
            .unwrap();
        app.scheduler.delete_by_id(&ctx, &first).await.unwrap();

        schedule_booking(&app.scheduler, &ctx, EventId::from("42"), tomorrow())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_same_event_for_other_owner_is_not_a_duplicate() {
        let app = app();
        let alice = register(&app, "alice");
        let bob = register(&app, "bob");

        schedule_booking(&app.scheduler, &alice, EventId::from("42"), tomorrow())
            .await
            .unwrap();
        schedule_booking(&app.scheduler, &bob, EventId::from("42"), tomorrow())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_booking_is_listed_with_error() {
        let app = App::with_parts(
            Arc::new(MemoryKv::new()),
            Arc::new(OfflineApi),
            EncryptionKey::generate(),
            SchedulerConfig::default().with_base_backoff(Duration::from_secs(60)),
        );
        let ctx = register(&app, "abc");
        schedule_booking(&app.scheduler, &ctx, EventId::from("42"), Utc::now())
            .await
            .unwrap();

        app.scheduler.run_due_jobs().await;

        let jobs = app.scheduler.list_jobs(&ctx, &[]).unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failing);
        let line = format_job(&jobs[0]);
        assert!(line.contains("failing"), "{}", line);
        assert!(line.contains("event 42"), "{}", line);
        assert!(line.contains("attempts 1"), "{}", line);
        assert!(line.contains("last error: authenticate: login: invalid login or password"), "{}", line);
    }

    fn event(id: &str, start: &str, taken: u32, total: u32) -> Event {
        let start = chrono::NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S").unwrap();
        Event {
            id: id.to_string(),
            name: "Reformer".to_string(),
            location: String::new(),
            trainer: "Kim".to_string(),
            notice: String::new(),
            start,
            length_minutes: 55,
            bookable_from: start.date().and_hms_opt(7, 0, 1).unwrap(),
            places_total: total,
            places_taken: taken,
            reserves_total: 2,
            reserves_taken: 2,
            booking: None,
        }
    }

    #[tokio::test]
    async fn test_event_lines_show_bookings_and_schedules() {
        let app = app();
        let ctx = register(&app, "abc");
        let job = schedule_booking(&app.scheduler, &ctx, EventId::from("12"), tomorrow())
            .await
            .unwrap();

        let mut booked = event("11", "2024-09-03 18:00:00", 4, 12);
        booked.booking = Some(ActivityBooking {
            booking_id: "77".to_string(),
            status: "ok".to_string(),
        });
        let mut waitlist = event("15", "2024-09-07 07:30:00", 12, 12);
        waitlist.reserves_taken = 1;
        let events = vec![
            booked,
            event("12", "2024-09-04 07:30:00", 12, 12),
            event("13", "2024-09-05 07:30:00", 9, 12),
            event("14", "2024-09-06 07:30:00", 12, 12),
            waitlist,
        ];
        let jobs = app.scheduler.list_jobs(&ctx, &[]).unwrap();

        let lines = event_lines(&events, &jobs);

        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("booked (ok)"), "{}", lines[0]);
        assert!(lines[1].contains(&format!("scheduled {}", job)), "{}", lines[1]);
        assert!(lines[2].ends_with("3 of 12 free"), "{}", lines[2]);
        assert!(
            lines[2].starts_with("13  2024-09-05 07:30  Reformer  Kim  opens 2024-09-05 07:00"),
            "{}",
            lines[2]
        );
        assert!(lines[3].ends_with("full"), "{}", lines[3]);
        assert!(lines[4].ends_with("1 of 2 reserve spots free"), "{}", lines[4]);
    }
}
