use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::Services;

/// A job claimed `started` but never finished (worker crashed mid-run) sits
/// stale for this long before the scheduler requeues it.
const STALE_STARTED_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// The only recurring duty this binary needs beyond the worker loops: sync
/// and renewal cadence is entirely self-sustaining via each handler's
/// successor-enqueue, so the scheduler's sole job is reclaiming jobs
/// abandoned by a crashed worker.
pub struct Scheduler {
    services: Arc<Services>,
}

impl Scheduler {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.services.config.scheduler.tick_interval_secs));

        info!(
            tick_interval_secs = self.services.config.scheduler.tick_interval_secs,
            "scheduler started"
        );

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        debug!("scheduler tick");

        match self.services.queue.recover_stale_started(STALE_STARTED_TIMEOUT).await {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "requeued stale started jobs"),
            Err(e) => error!(error = %e, "failed to recover stale started jobs"),
        }
    }
}
