use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{infrastructure::shutdown::Shutdown, tasks::coordinator::Sweep};

/// Registers a sweep every `interval`. Ticks that land while a sweep is still
/// running are dropped by [`Sweep::run`].
pub async fn configure_sweep_job(
    interval: Duration,
    sweep: Arc<Sweep>,
    shutdown: Shutdown,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    let job = Job::new_repeated_async(interval, move |_id, _l| {
        let sweep = sweep.clone();
        let listener = shutdown.subscribe();
        Box::pin(async move {
            if listener.is_triggered() {
                return;
            }
            tracing::info!(target: "scheduler", "sweep triggered");
            let summaries = sweep.run(&listener).await;
            tracing::debug!(target: "scheduler", accounts = summaries.len(), "sweep done");
        })
    })?;
    scheduler.add(job).await?;
    tracing::info!(target: "scheduler", interval = ?interval, "sweep job registered");
    scheduler.start().await?;
    Ok(scheduler)
}
