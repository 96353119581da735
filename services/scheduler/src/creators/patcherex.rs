//! Patching jobs: one per binary and patch type.

use std::sync::Arc;

use async_trait::async_trait;
use jobvisor_reconcile::{JobPayload, MemoryUnit, NewJob, ResourceProfile};
use tracing::debug;

use super::{CreatorResult, JobCreator, WorkSource};

const PRIORITY: i32 = 200;

/// Patch types used when none are configured.
pub const DEFAULT_PATCH_TYPES: &[&str] = &["reassembler", "detour"];

pub struct PatcherexCreator {
    source: Arc<dyn WorkSource>,
    patch_types: Vec<String>,
}

impl PatcherexCreator {
    pub fn new(source: Arc<dyn WorkSource>, patch_types: Vec<String>) -> Self {
        Self {
            source,
            patch_types,
        }
    }

    fn resources() -> ResourceProfile {
        // 3.5 GiB requested, 16 GiB limit
        ResourceProfile::limits(1.0, 16 * 1024, MemoryUnit::MiB).with_requests(1.0, 3584)
    }
}

#[async_trait]
impl JobCreator for PatcherexCreator {
    fn name(&self) -> &'static str {
        "patcherex"
    }

    async fn jobs(&self) -> CreatorResult<Vec<NewJob>> {
        debug!("Collecting jobs");
        let binaries = self.source.binaries().await?;

        let mut jobs = Vec::with_capacity(binaries.len() * self.patch_types.len());
        for binary in &binaries {
            for patch_type in &self.patch_types {
                debug!(binary = %binary.name, patch_type = %patch_type, "Yielding patcherex job");
                jobs.push(NewJob::new(
                    PRIORITY,
                    Self::resources(),
                    JobPayload::Patcherex {
                        binary_id: binary.id,
                        patch_type: patch_type.clone(),
                    },
                ));
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creators::{BinaryRef, StaticWorkSource};

    #[tokio::test]
    async fn test_one_job_per_binary_and_patch_type() {
        let source = StaticWorkSource {
            binaries: vec![
                BinaryRef { id: 1, name: "a".to_string() },
                BinaryRef { id: 2, name: "b".to_string() },
            ],
            ..Default::default()
        };
        let patch_types = DEFAULT_PATCH_TYPES.iter().map(|s| s.to_string()).collect();
        let jobs = PatcherexCreator::new(Arc::new(source), patch_types)
            .jobs()
            .await
            .unwrap();

        assert_eq!(jobs.len(), 4);
        assert!(jobs.iter().all(|j| j.priority == 200));
        assert_eq!(jobs[0].resources.limit_memory_bytes(), 16 << 30);
        assert_eq!(jobs[0].resources.request_memory_bytes(), Some(3584 << 20));
    }
}
