//! Job creators.
//!
//! Each creator scans a [`WorkSource`] for one category of work and yields a
//! descriptor per unit of work, with a fixed priority and resource profile.
//! Creators hold no scheduling logic. Saving descriptors through
//! [`JobStore::save`] is idempotent, so running creators every tick over
//! unchanged input creates nothing new.

mod cache;
mod network_poll;
mod patcherex;
mod rop_cache;
mod source;

pub use cache::CacheCreator;
pub use network_poll::NetworkPollCreator;
pub use patcherex::{PatcherexCreator, DEFAULT_PATCH_TYPES};
pub use rop_cache::RopCacheCreator;
pub use source::{BinaryRef, ChallengeSetRef, PgWorkSource, StaticWorkSource};

use std::sync::Arc;

use async_trait::async_trait;
use jobvisor_reconcile::NewJob;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{DbError, JobStore};

/// Result type for creator operations.
pub type CreatorResult<T> = Result<T, CreatorError>;

/// Errors raised while enumerating work.
#[derive(Debug, Error)]
pub enum CreatorError {
    #[error("work source query failed: {0}")]
    Source(#[from] sqlx::Error),

    #[error("job store error: {0}")]
    Store(#[from] DbError),
}

/// Where creators find units of work.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Every known binary.
    async fn binaries(&self) -> CreatorResult<Vec<BinaryRef>>;

    /// Challenge sets made of exactly one binary.
    async fn single_binary_challenge_sets(&self) -> CreatorResult<Vec<ChallengeSetRef>>;

    /// Ids of traffic captures not processed yet.
    async fn unprocessed_traffic(&self) -> CreatorResult<Vec<i64>>;
}

/// Produces job descriptors for one category of work.
#[async_trait]
pub trait JobCreator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Descriptors for all current units of work.
    async fn jobs(&self) -> CreatorResult<Vec<NewJob>>;
}

/// Build the standard creator set over one source.
pub fn default_creators(
    source: Arc<dyn WorkSource>,
    patch_types: Vec<String>,
) -> Vec<Box<dyn JobCreator>> {
    vec![
        Box::new(PatcherexCreator::new(source.clone(), patch_types)),
        Box::new(CacheCreator::new(source.clone())),
        Box::new(RopCacheCreator::new(source.clone())),
        Box::new(NetworkPollCreator::new(source)),
    ]
}

/// Run every creator and save what they yield.
///
/// A creator that fails is logged and skipped. Returns the number of
/// descriptors saved.
pub async fn materialize(creators: &[Box<dyn JobCreator>], store: &dyn JobStore) -> usize {
    let mut saved = 0;

    for creator in creators {
        let jobs = match creator.jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(creator = creator.name(), error = %e, "Job creator failed");
                continue;
            }
        };

        debug!(creator = creator.name(), count = jobs.len(), "Collected jobs");
        for job in jobs {
            match store.save(job).await {
                Ok(_) => saved += 1,
                Err(e) => {
                    warn!(creator = creator.name(), error = %e, "Failed to save job");
                }
            }
        }
    }

    saved
}
