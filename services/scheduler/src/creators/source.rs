//! Work sources the creators scan.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{CreatorResult, WorkSource};

/// A binary jobs can be run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRef {
    pub id: i64,
    pub name: String,
}

/// A challenge set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSetRef {
    pub id: i64,
    pub name: String,
}

/// Work source reading the `binaries`, `challenge_sets` and `round_traffic` tables.
#[derive(Clone)]
pub struct PgWorkSource {
    pool: PgPool,
}

impl PgWorkSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkSource for PgWorkSource {
    async fn binaries(&self) -> CreatorResult<Vec<BinaryRef>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM binaries ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| BinaryRef { id, name })
            .collect())
    }

    async fn single_binary_challenge_sets(&self) -> CreatorResult<Vec<ChallengeSetRef>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT cs.id, cs.name
            FROM challenge_sets cs
            JOIN binaries b ON b.challenge_set_id = cs.id
            GROUP BY cs.id, cs.name
            HAVING COUNT(b.id) = 1
            ORDER BY cs.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| ChallengeSetRef { id, name })
            .collect())
    }

    async fn unprocessed_traffic(&self) -> CreatorResult<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM round_traffic WHERE NOT processed ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

/// Fixed in-memory work source.
#[derive(Debug, Clone, Default)]
pub struct StaticWorkSource {
    pub binaries: Vec<BinaryRef>,
    pub challenge_sets: Vec<ChallengeSetRef>,
    pub traffic: Vec<i64>,
}

#[async_trait]
impl WorkSource for StaticWorkSource {
    async fn binaries(&self) -> CreatorResult<Vec<BinaryRef>> {
        Ok(self.binaries.clone())
    }

    async fn single_binary_challenge_sets(&self) -> CreatorResult<Vec<ChallengeSetRef>> {
        Ok(self.challenge_sets.clone())
    }

    async fn unprocessed_traffic(&self) -> CreatorResult<Vec<i64>> {
        Ok(self.traffic.clone())
    }
}
