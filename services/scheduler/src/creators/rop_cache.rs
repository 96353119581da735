//! ROP cache jobs: one per single-binary challenge set.

use std::sync::Arc;

use async_trait::async_trait;
use jobvisor_reconcile::{JobPayload, MemoryUnit, NewJob, ResourceProfile};
use tracing::debug;

use super::{CreatorResult, JobCreator, WorkSource};

const PRIORITY: i32 = 90;

pub struct RopCacheCreator {
    source: Arc<dyn WorkSource>,
}

impl RopCacheCreator {
    pub fn new(source: Arc<dyn WorkSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl JobCreator for RopCacheCreator {
    fn name(&self) -> &'static str {
        "rop_cache"
    }

    async fn jobs(&self) -> CreatorResult<Vec<NewJob>> {
        debug!("Collecting jobs");
        let jobs = self
            .source
            .single_binary_challenge_sets()
            .await?
            .into_iter()
            .map(|cs| {
                debug!(challenge_set = %cs.name, "Yielding rop cache job");
                NewJob::new(
                    PRIORITY,
                    ResourceProfile::limits(1.0, 8192, MemoryUnit::MiB).with_requests(1.0, 2048),
                    JobPayload::RopCache {
                        challenge_set_id: cs.id,
                    },
                )
            })
            .collect();
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creators::{ChallengeSetRef, StaticWorkSource};

    #[tokio::test]
    async fn test_rop_cache_jobs() {
        let source = StaticWorkSource {
            challenge_sets: vec![ChallengeSetRef { id: 12, name: "CADET_00001".to_string() }],
            ..Default::default()
        };
        let jobs = RopCacheCreator::new(Arc::new(source)).jobs().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, 90);
        assert_eq!(jobs[0].payload, JobPayload::RopCache { challenge_set_id: 12 });
        assert_eq!(jobs[0].resources.limit_memory_bytes(), 8 << 30);
    }
}
