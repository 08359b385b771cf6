//! Long-running daemon: the scheduler loop until Ctrl-C.

use miette::Result;
use slotbook_scheduler::{Job, JobPayload};
use tracing::{info, warn};

use crate::app::App;

/// Run the scheduler until a shutdown signal arrives.
pub async fn run(app: App) -> Result<()> {
    info!("starting Slotbook daemon");

    app.scheduler.on_job_succeeded(|job: Job| async move {
        info!(job_id = %job.id, target = %describe(&job), "booking succeeded");
        Ok::<(), String>(())
    });
    app.scheduler.on_job_failed(|job: Job| async move {
        let error = job.errors.last().cloned().unwrap_or_default();
        warn!(
            job_id = %job.id,
            target = %describe(&job),
            attempts = job.attempts.len(),
            error = %error,
            "booking attempt failed"
        );
        Ok::<(), String>(())
    });

    app.scheduler
        .init()
        .await
        .map_err(|e| miette::miette!("failed to start scheduler: {}", e))?;
    let pending = app.scheduler.pending_jobs().await.len();
    info!(pending, "daemon running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for shutdown signal: {}", e))?;
    info!("received shutdown signal");

    app.scheduler.shutdown().await;
    info!("daemon stopped");
    Ok(())
}

fn describe(job: &Job) -> String {
    match &job.payload {
        JobPayload::BookEvent(book) => {
            format!("event {} for {}", book.event_id, book.credentials_id)
        }
        JobPayload::Unsupported => "unsupported job".to_string(),
    }
}
