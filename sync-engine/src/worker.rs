use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use shared::queue::{Job, QueueName};

use crate::handlers::{self, HandlerError, JobPayload};
use crate::Services;

/// One worker loop claims and runs jobs one at a time: on every poll it
/// walks the three priority queues in weight order (`critical` drained
/// before `default` before `low`) until it finds one job to run, then
/// loops again immediately. `main` spawns `max_concurrent_tasks` of these
/// loops, so that count alone bounds how many jobs run at once.
pub async fn run_worker_loop(services: Arc<Services>) {
    let poll_interval = Duration::from_millis(services.config.worker.poll_interval_ms);

    loop {
        match claim_one(&services).await {
            Ok(Some(job)) => run_job(&services, job).await,
            Ok(None) => sleep(poll_interval).await,
            Err(e) => {
                error!(error = %e, "failed to dequeue job");
                sleep(poll_interval).await;
            }
        }
    }
}

async fn claim_one(services: &Services) -> Result<Option<Job>, shared::queue::QueueError> {
    for queue in weighted_queue_order() {
        let mut batch = services.queue.dequeue_batch(queue, 1).await?;
        if let Some(job) = batch.pop() {
            return Ok(Some(job));
        }
    }
    Ok(None)
}

/// Repeats each queue name proportionally to its weight so a single pass
/// favors `critical` without ever starving `default`/`low` outright.
fn weighted_queue_order() -> Vec<QueueName> {
    let mut order = Vec::new();
    for queue in QueueName::all() {
        for _ in 0..queue.weight() {
            order.push(queue);
        }
    }
    order
}

async fn run_job(services: &Services, job: Job) {
    let payload: JobPayload = match serde_json::from_value(job.payload.clone()) {
        Ok(p) => p,
        Err(e) => {
            warn!(job_id = %job.job_id, error = %e, "job payload did not deserialize, dead-lettering");
            if let Err(e) = services.queue.mark_dead_letter(&job.job_id).await {
                error!(job_id = %job.job_id, error = %e, "failed to dead-letter undeserializable job");
            }
            return;
        }
    };

    let result: Result<(), HandlerError> = match job.job_type.as_str() {
        handlers::FILE_SYNC_JOB => {
            handlers::handle_file_sync(services, &job.job_id, job.retry_count, &payload).await
        }
        handlers::AUTH_TOKEN_RENEWAL_JOB => {
            handlers::handle_auth_token_renewal(services, &job.job_id, job.retry_count, &payload).await
        }
        other => Err(HandlerError::Terminal(anyhow::anyhow!(
            "unknown job type: {other}"
        ))),
    };

    if let Err(e) = &result {
        warn!(job_id = %job.job_id, job_type = %job.job_type, error = %e.message(), "job attempt failed");
    }

    handlers::mark_job_outcome(services, &job.job_id, job.retry_count, &result).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_order_repeats_each_queue_by_its_weight() {
        let order = weighted_queue_order();
        assert_eq!(order.iter().filter(|q| **q == QueueName::Critical).count(), 6);
        assert_eq!(order.iter().filter(|q| **q == QueueName::Default).count(), 3);
        assert_eq!(order.iter().filter(|q| **q == QueueName::Low).count(), 1);
        assert_eq!(order.len(), 10);
    }

    #[test]
    fn weighted_order_never_lets_low_or_default_precede_critical() {
        let order = weighted_queue_order();
        assert_eq!(order.first(), Some(&QueueName::Critical));
    }
}
