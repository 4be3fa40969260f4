use crate::api::{run_api, ApiState};
use crate::config::BrokerConfig;
use crate::scheduler::JobQueue;

/// Owns the shared job queue and the API server that fronts it.
pub struct Broker {
    pub config: BrokerConfig,
    pub state: ApiState,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let queue = JobQueue::with_capacity(config.max_jobs)
            .with_redelivery_grace(config.redelivery_grace);
        let state = ApiState::new(queue, config.max_batch_size);
        Self { config, state }
    }

    /// Serve requests until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        run_api(self.config.listen_addr, self.state.clone(), shutdown).await?;

        let queue = self.state.job_queue.read().await;
        tracing::info!(
            jobs = queue.len(),
            remaining_tasks = queue.status(false).remaining_tasks,
            "Broker stopped, unfinished work is discarded"
        );
        Ok(())
    }
}
