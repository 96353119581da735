//! Cache jobs: one per binary.

use std::sync::Arc;

use async_trait::async_trait;
use jobvisor_reconcile::{JobPayload, MemoryUnit, NewJob, ResourceProfile};
use tracing::debug;

use super::{CreatorResult, JobCreator, WorkSource};

/// A cache should always be built, so it outranks most analysis.
const PRIORITY: i32 = 100;

pub struct CacheCreator {
    source: Arc<dyn WorkSource>,
}

impl CacheCreator {
    pub fn new(source: Arc<dyn WorkSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl JobCreator for CacheCreator {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn jobs(&self) -> CreatorResult<Vec<NewJob>> {
        debug!("Collecting jobs");
        let jobs = self
            .source
            .binaries()
            .await?
            .into_iter()
            .map(|binary| {
                debug!(binary_id = binary.id, "Yielding cache job");
                NewJob::new(
                    PRIORITY,
                    ResourceProfile::limits(1.0, 8, MemoryUnit::GiB),
                    JobPayload::Cache {
                        binary_id: binary.id,
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
    use crate::creators::{BinaryRef, StaticWorkSource};

    #[tokio::test]
    async fn test_cache_jobs() {
        let source = StaticWorkSource {
            binaries: vec![BinaryRef { id: 4, name: "cb".to_string() }],
            ..Default::default()
        };
        let jobs = CacheCreator::new(Arc::new(source)).jobs().await.unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, 100);
        assert_eq!(jobs[0].payload, JobPayload::Cache { binary_id: 4 });
        assert_eq!(jobs[0].resources.limit_memory_bytes(), 8 << 30);
    }
}
