use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::validation::TAKEN;
use crate::common::{ProposalId, SupportId, UserId, ValidationErrors};

use super::proposal::{Proposal, HOTNESS_PER_DAY};

/// One user's support of a proposal. A user supports a proposal at most once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Support {
    pub id: SupportId,
    pub user_id: UserId,
    pub proposal_id: ProposalId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Support {
    pub async fn find_for_proposal(proposal_id: ProposalId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM supports WHERE proposal_id = $1 ORDER BY created_at",
        )
        .bind(proposal_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Insert the support, bump the proposal counter cache and hotness in one
    /// transaction
    pub async fn create(
        user_id: UserId,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
        pool: &PgPool,
    ) -> Result<Self> {
        let mut tx = pool.begin().await?;

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM supports WHERE user_id = $1 AND proposal_id = $2)",
        )
        .bind(user_id)
        .bind(proposal_id)
        .fetch_one(&mut *tx)
        .await?;
        if already {
            let mut errors = ValidationErrors::new();
            errors.add("user_id", TAKEN);
            return Err(errors.into());
        }

        let support = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO supports (id, user_id, proposal_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(SupportId::new())
        .bind(user_id)
        .bind(proposal_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let proposal = Self::adjust_counter(&mut tx, proposal_id, 1, now).await?;
        tx.commit().await?;

        tracing::info!(
            proposal_id = %proposal_id,
            supports_count = ?proposal.supports_count,
            hotness = ?proposal.hotness,
            "support added"
        );
        Ok(support)
    }

    /// Remove the support and decrement the counter cache
    pub async fn delete(id: SupportId, now: DateTime<Utc>, pool: &PgPool) -> Result<()> {
        let mut tx = pool.begin().await?;

        let proposal_id: Option<ProposalId> =
            sqlx::query_scalar("DELETE FROM supports WHERE id = $1 RETURNING proposal_id")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(proposal_id) = proposal_id {
            Self::adjust_counter(&mut tx, proposal_id, -1, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn adjust_counter(
        tx: &mut Transaction<'_, Postgres>,
        proposal_id: ProposalId,
        delta: i32,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        sqlx::query_as::<_, Proposal>(
            r#"
            UPDATE proposals
            SET supports_count = GREATEST(COALESCE(supports_count, 0) + $2, 0),
                hotness = GREATEST(COALESCE(supports_count, 0) + $2, 0)
                    + FLOOR(EXTRACT(EPOCH FROM ($3 - created_at)) / 86400)::BIGINT * $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(proposal_id)
        .bind(delta)
        .bind(now)
        .bind(HOTNESS_PER_DAY)
        .fetch_one(&mut **tx)
        .await
        .map_err(Into::into)
    }
}
