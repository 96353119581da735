//! Network poll jobs: one per unprocessed traffic capture.

use std::sync::Arc;

use async_trait::async_trait;
use jobvisor_reconcile::{JobPayload, MemoryUnit, NewJob, ResourceProfile};
use tracing::debug;

use super::{CreatorResult, JobCreator, WorkSource};

const PRIORITY: i32 = 50;

pub struct NetworkPollCreator {
    source: Arc<dyn WorkSource>,
}

impl NetworkPollCreator {
    pub fn new(source: Arc<dyn WorkSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl JobCreator for NetworkPollCreator {
    fn name(&self) -> &'static str {
        "network_poll"
    }

    async fn jobs(&self) -> CreatorResult<Vec<NewJob>> {
        let jobs = self
            .source
            .unprocessed_traffic()
            .await?
            .into_iter()
            .map(|traffic_id| {
                debug!(traffic_id, "Creating network poll job");
                NewJob::new(
                    PRIORITY,
                    ResourceProfile::limits(1.0, 2, MemoryUnit::GiB),
                    JobPayload::NetworkPoll { traffic_id },
                )
            })
            .collect();
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creators::StaticWorkSource;

    #[tokio::test]
    async fn test_network_poll_jobs() {
        let source = StaticWorkSource {
            traffic: vec![8, 9],
            ..Default::default()
        };
        let jobs = NetworkPollCreator::new(Arc::new(source)).jobs().await.unwrap();

        let payloads: Vec<_> = jobs.iter().map(|j| j.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                JobPayload::NetworkPoll { traffic_id: 8 },
                JobPayload::NetworkPoll { traffic_id: 9 },
            ]
        );
        assert!(jobs.iter().all(|j| j.priority == 50));
    }
}
