//! Job scheduler implementation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use slotbook_auth::AuthContext;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    EventId, Job, JobError, JobFilter, JobId, JobRuntime, JobStatus, JobStore, SchedulerConfig,
    SchedulerError,
};

/// Type alias for a success or failure observer.
pub type JobObserver =
    Arc<dyn Fn(Job) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Jobs currently executing, and those deleted while they were.
#[derive(Default)]
struct InFlight {
    running: HashSet<JobId>,
    cancelled: HashSet<JobId>,
}

enum LoopState {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// The job scheduler.
///
/// Holds every outstanding job in memory, runs due ones from a background
/// tick loop and mirrors each state change to the [`JobStore`].
///
/// Other schedulers may share the store. Each tick first reconciles the
/// in-memory set with it, so their schedules and deletes are seen.
pub struct Scheduler {
    store: JobStore,
    runtime: JobRuntime,
    config: SchedulerConfig,
    jobs: RwLock<HashMap<JobId, Job>>,
    in_flight: std::sync::Mutex<InFlight>,
    succeeded_observers: std::sync::RwLock<Vec<JobObserver>>,
    failed_observers: std::sync::RwLock<Vec<JobObserver>>,
    state: Mutex<LoopState>,
}

impl Scheduler {
    /// Create a new scheduler. Nothing runs until [`Scheduler::init`].
    pub fn new(store: JobStore, runtime: JobRuntime, config: SchedulerConfig) -> Self {
        Self {
            store,
            runtime,
            config,
            jobs: RwLock::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(InFlight::default()),
            succeeded_observers: std::sync::RwLock::new(Vec::new()),
            failed_observers: std::sync::RwLock::new(Vec::new()),
            state: Mutex::new(LoopState::Idle),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Load outstanding jobs from the store and start the tick loop.
    ///
    /// May be called once per scheduler; later calls return
    /// [`SchedulerError::AlreadyStarted`].
    #[tracing::instrument(skip(self))]
    pub async fn init(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, LoopState::Idle) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let loaded = self.store.list(&self.outstanding())?;

        {
            let mut jobs = self.jobs.write().await;
            for job in loaded {
                if job.status == JobStatus::Running {
                    warn!(job_id = %job.id, "resuming job interrupted mid-attempt");
                }
                jobs.insert(job.id.clone(), job);
            }
            info!(count = jobs.len(), "loaded jobs from store");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        *state = LoopState::Running {
            shutdown_tx,
            handle,
        };
        Ok(())
    }

    /// Stop the tick loop and wait for it to exit.
    ///
    /// An attempt already executing is allowed to finish. Does nothing if
    /// the loop is not running.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, LoopState::Running { .. }) {
            return;
        }
        if let LoopState::Running {
            shutdown_tx,
            handle,
        } = std::mem::replace(&mut *state, LoopState::Stopped)
        {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop panicked");
            }
        }
    }

    /// Persist a job as pending and start tracking it.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn schedule(&self, mut job: Job) -> Result<JobId, SchedulerError> {
        job.status = JobStatus::Pending;
        self.store.insert(&job)?;

        let id = job.id.clone();
        info!(time = %job.time, "scheduled job");
        self.jobs.write().await.insert(id.clone(), job);
        Ok(id)
    }

    /// Look up one of the caller's jobs.
    ///
    /// Jobs owned by anyone else are reported as not found.
    pub fn find_by_id(&self, ctx: &AuthContext, id: &JobId) -> Result<Job, SchedulerError> {
        let job = self.store.find_by_id(id)?;
        match job.owner() {
            Some(owner) if ctx.is(owner) => Ok(job),
            _ => Err(SchedulerError::NotFound(id.clone())),
        }
    }

    /// The caller's jobs matching every filter.
    pub fn list_jobs(
        &self,
        ctx: &AuthContext,
        filters: &[JobFilter],
    ) -> Result<Vec<Job>, SchedulerError> {
        let Some(owner) = ctx.identity() else {
            return Ok(Vec::new());
        };
        let mut all = vec![JobFilter::Owner(owner.clone())];
        all.extend_from_slice(filters);
        self.store.list(&all)
    }

    /// The caller's latest job for an event.
    pub fn find_book_event(
        &self,
        ctx: &AuthContext,
        event_id: &EventId,
    ) -> Result<Option<Job>, SchedulerError> {
        match ctx.identity() {
            Some(owner) => self.store.find_book_event(owner, event_id),
            None => Ok(None),
        }
    }

    /// Delete one of the caller's jobs from memory and the store.
    ///
    /// A job deleted while executing is neither re-queued nor re-persisted
    /// when its attempt completes.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn delete_by_id(&self, ctx: &AuthContext, id: &JobId) -> Result<(), SchedulerError> {
        self.find_by_id(ctx, id)?;

        // Under the map lock so a concurrent reconcile cannot re-adopt the
        // record between the two removals.
        let mut jobs = self.jobs.write().await;
        jobs.remove(id);
        {
            let mut in_flight = self.lock_in_flight();
            if in_flight.running.contains(id) {
                in_flight.cancelled.insert(id.clone());
            }
        }
        self.store.delete(id)?;
        drop(jobs);

        info!(job_id = %id, "deleted job");
        Ok(())
    }

    /// Register an observer called with the job after each successful attempt.
    pub fn on_job_succeeded<F, Fut>(&self, callback: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let observer: JobObserver = Arc::new(move |job: Job| callback(job).boxed());
        self.succeeded_observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Register an observer called with the job after each failed attempt.
    pub fn on_job_failed<F, Fut>(&self, callback: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let observer: JobObserver = Arc::new(move |job: Job| callback(job).boxed());
        self.failed_observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Snapshot of the jobs waiting to run, earliest first.
    ///
    /// Jobs executing right now are not included.
    pub async fn pending_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Run every job that is due now, one after another.
    ///
    /// The in-memory set is first brought in line with the store, so jobs
    /// another process scheduled or deleted are picked up or dropped.
    /// Returns the number of jobs that were attempted.
    pub async fn run_due_jobs(&self) -> usize {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "failed to reconcile jobs with store");
        }

        let now = Utc::now();
        let mut due: Vec<Job> = {
            let mut jobs = self.jobs.write().await;
            let ids: Vec<JobId> = jobs
                .values()
                .filter(|j| j.is_due(now))
                .map(|j| j.id.clone())
                .collect();
            let mut in_flight = self.lock_in_flight();
            ids.into_iter()
                .filter_map(|id| {
                    let job = jobs.remove(&id)?;
                    in_flight.running.insert(id);
                    Some(job)
                })
                .collect()
        };
        due.sort_by(|a, b| a.time.cmp(&b.time));

        let count = due.len();
        for job in due {
            self.run_job(job).await;
        }
        count
    }

    /// Filters selecting the stored jobs that may still run.
    fn outstanding(&self) -> [JobFilter; 2] {
        [
            JobFilter::status([JobStatus::Pending, JobStatus::Running, JobStatus::Failing]),
            JobFilter::ExcludeExhausted {
                max_attempts: self.config.max_attempts,
            },
        ]
    }

    /// Drop in-memory jobs whose record is gone and adopt outstanding
    /// records this scheduler does not know about.
    ///
    /// Jobs executing right now are left alone.
    async fn reconcile(&self) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let stored = self.store.list(&self.outstanding())?;
        let in_flight = self.lock_in_flight();

        let stored_ids: HashSet<&JobId> = stored.iter().map(|j| &j.id).collect();
        let before = jobs.len();
        jobs.retain(|id, _| stored_ids.contains(id));
        let dropped = before - jobs.len();

        let mut adopted = 0;
        for job in stored {
            if in_flight.running.contains(&job.id) || jobs.contains_key(&job.id) {
                continue;
            }
            jobs.insert(job.id.clone(), job);
            adopted += 1;
        }

        if dropped > 0 || adopted > 0 {
            info!(dropped, adopted, "reconciled jobs with store");
        }
        Ok(())
    }

    /// Run the scheduler loop.
    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(tick = ?self.config.tick_interval, "scheduler starting");

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let ran = self.run_due_jobs().await;
                    if ran > 0 {
                        debug!(count = ran, "tick finished");
                    }
                }
            }
        }

        info!("scheduler shut down gracefully");
    }

    /// Execute one attempt of a job claimed by `run_due_jobs`.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn run_job(&self, mut job: Job) {
        let before = job.clone();
        job.status = JobStatus::Running;
        job.attempts.push(Utc::now());

        // Only a job whose record still exists is attempted
        match self.store.replace(&job) {
            Ok(true) => {}
            Ok(false) => {
                info!("job no longer stored, dropping");
                self.release(before, false).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to persist job before running");
                if !self.release(before, true).await {
                    self.forget(&job.id);
                }
                return;
            }
        }
        info!(attempt = job.attempts.len(), "starting job");

        let result = match timeout(self.config.attempt_timeout, job.execute(&self.runtime)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Timeout(self.config.attempt_timeout)),
        };

        let retry = match &result {
            Ok(()) => {
                job.errors.push(String::new());
                job.status = JobStatus::Succeeded;
                info!("job succeeded");
                false
            }
            Err(e) => {
                job.errors.push(e.to_string());
                job.status = JobStatus::Failing;
                let next = if e.is_retryable() {
                    job.next_retry(self.config.base_backoff, self.config.max_attempts)
                } else {
                    None
                };
                match next {
                    Some(next) => {
                        warn!(
                            error = %e,
                            attempt = job.attempts.len(),
                            next_retry = %next,
                            "job failed, scheduled retry"
                        );
                        job.time = next;
                        true
                    }
                    None => {
                        error!(
                            error = %e,
                            attempts = job.attempts.len(),
                            "job failed, giving up"
                        );
                        false
                    }
                }
            }
        };

        let (persisted, requeue) = match self.store.replace(&job) {
            Ok(true) => (true, retry),
            Ok(false) => {
                info!("job deleted from store while running, result dropped");
                (false, false)
            }
            Err(e) => {
                error!(error = %e, "failed to persist job result");
                (false, retry)
            }
        };

        if !self.release(job.clone(), requeue).await {
            info!("job was deleted while running");
            self.forget(&job.id);
        }

        if persisted {
            self.notify(&job).await;
        }
    }

    /// Drop the in-flight claim on a job, re-queueing it if `requeue`.
    ///
    /// Returns false when the job was deleted while it ran, in which case it
    /// is not re-queued.
    async fn release(&self, job: Job, requeue: bool) -> bool {
        let mut jobs = self.jobs.write().await;
        let cancelled = {
            let mut in_flight = self.lock_in_flight();
            in_flight.running.remove(&job.id);
            in_flight.cancelled.remove(&job.id)
        };
        if cancelled {
            return false;
        }
        if requeue {
            jobs.insert(job.id.clone(), job);
        }
        true
    }

    /// Undo writes made by an attempt whose job was deleted meanwhile.
    fn forget(&self, id: &JobId) {
        if let Err(e) = self.store.delete(id) {
            error!(job_id = %id, error = %e, "failed to delete cancelled job");
        }
    }

    /// Call the observers for this attempt's outcome, in registration order.
    async fn notify(&self, job: &Job) {
        let (outcome, observers) = if job.status == JobStatus::Succeeded {
            ("succeeded", &self.succeeded_observers)
        } else {
            ("failed", &self.failed_observers)
        };
        let observers: Vec<JobObserver> = observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, observer) in observers.iter().enumerate() {
            let call = AssertUnwindSafe(async { observer(job.clone()).await }).catch_unwind();
            match timeout(self.config.callback_timeout, call).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    warn!(observer = index, outcome, error = %e, "job observer failed")
                }
                Ok(Err(_)) => error!(observer = index, outcome, "job observer panicked"),
                Err(_) => warn!(observer = index, outcome, "job observer timed out"),
            }
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use slotbook_auth::{AuthError, Authenticator, CredentialsId};
    use slotbook_client::{
        ActivityBooking, ApiError, BookingApi, Event, ListEventsInput, LoginData, Session,
        SessionCookie,
    };
    use slotbook_store::MemoryKv;

    struct NoopAuthenticator;

    #[async_trait]
    impl Authenticator for NoopAuthenticator {
        async fn authenticate(&self, _credentials_id: &CredentialsId) -> Result<Session, AuthError> {
            Ok(Session::new("token"))
        }
    }

    struct AlwaysBooks;

    #[async_trait]
    impl BookingApi for AlwaysBooks {
        async fn login(&self, _data: &LoginData) -> Result<SessionCookie, ApiError> {
            unreachable!("authentication is faked")
        }

        async fn list_events(
            &self,
            _session: &Session,
            _input: &ListEventsInput,
        ) -> Result<Vec<Event>, ApiError> {
            Ok(Vec::new())
        }

        async fn book_activity(
            &self,
            _session: &Session,
            activity_id: &str,
        ) -> Result<ActivityBooking, ApiError> {
            Ok(ActivityBooking {
                booking_id: format!("b-{}", activity_id),
                status: "booked".to_string(),
            })
        }

        async fn cancel_booking(&self, _session: &Session, _booking_id: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let runtime = JobRuntime::new(Arc::new(NoopAuthenticator), Arc::new(AlwaysBooks));
        Arc::new(Scheduler::new(
            JobStore::new(Arc::new(MemoryKv::new())),
            runtime,
            SchedulerConfig::default().with_tick_interval(Duration::from_millis(10)),
        ))
    }

    fn ctx(owner: &str) -> AuthContext {
        AuthContext::authenticated(CredentialsId::from(owner))
    }

    #[tokio::test]
    async fn test_future_jobs_are_not_run() {
        let scheduler = scheduler();
        let job = Job::book_event(
            &ctx("abc"),
            EventId::from("1"),
            Utc::now() + chrono::Duration::hours(1),
        )
        .unwrap();
        scheduler.schedule(job).await.unwrap();

        assert_eq!(scheduler.run_due_jobs().await, 0);
        assert_eq!(scheduler.pending_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_forces_pending() {
        let scheduler = scheduler();
        let mut job = Job::book_event(&ctx("abc"), EventId::from("1"), Utc::now()).unwrap();
        job.status = JobStatus::Succeeded;

        let id = scheduler.schedule(job).await.unwrap();

        let stored = scheduler.find_by_id(&ctx("abc"), &id).unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_jobs_scoped_to_caller() {
        let scheduler = scheduler();
        for owner in ["abc", "abc", "xyz"] {
            let job = Job::book_event(&ctx(owner), EventId::from("1"), Utc::now()).unwrap();
            scheduler.schedule(job).await.unwrap();
        }

        assert_eq!(scheduler.list_jobs(&ctx("abc"), &[]).unwrap().len(), 2);
        assert!(
            scheduler
                .list_jobs(&AuthContext::anonymous(), &[])
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_find_book_event_scoped_to_caller() {
        let scheduler = scheduler();
        let job = Job::book_event(&ctx("abc"), EventId::from("1"), Utc::now()).unwrap();
        let id = scheduler.schedule(job).await.unwrap();

        let found = scheduler
            .find_book_event(&ctx("abc"), &EventId::from("1"))
            .unwrap();
        assert_eq!(found.map(|j| j.id), Some(id));
        assert_eq!(
            scheduler
                .find_book_event(&ctx("xyz"), &EventId::from("1"))
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_init_twice_is_rejected() {
        let scheduler = scheduler();
        scheduler.init().await.unwrap();

        assert!(matches!(
            scheduler.init().await,
            Err(SchedulerError::AlreadyStarted)
        ));
        scheduler.shutdown().await;
        assert!(matches!(
            scheduler.init().await,
            Err(SchedulerError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_without_init_is_noop() {
        let scheduler = scheduler();
        scheduler.shutdown().await;
        scheduler.init().await.unwrap();
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_loop_stops_after_shutdown() {
        let scheduler = scheduler();
        scheduler.init().await.unwrap();
        scheduler.shutdown().await;

        let job = Job::book_event(&ctx("abc"), EventId::from("1"), Utc::now()).unwrap();
        scheduler.schedule(job).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(scheduler.pending_jobs().await.len(), 1);
    }
}
