use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use crate::common::{ImpulsaProjectId, ImpulsaProjectStateTransitionId};

use super::project_state::{ProjectEvent, ProjectState};

/// Audit row written for every project state change.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImpulsaProjectStateTransition {
    pub id: ImpulsaProjectStateTransitionId,
    pub impulsa_project_id: ImpulsaProjectId,
    pub namespace: Option<String>,
    pub event: String,
    pub from_state: ProjectState,
    pub to_state: ProjectState,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ImpulsaProjectStateTransition {
    pub(crate) async fn record(
        tx: &mut Transaction<'_, Postgres>,
        project_id: ImpulsaProjectId,
        event: ProjectEvent,
        from: ProjectState,
        to: ProjectState,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO impulsa_project_state_transitions
                (id, impulsa_project_id, event, from_state, to_state)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(ImpulsaProjectStateTransitionId::new())
        .bind(project_id)
        .bind(event.as_str())
        .bind(from)
        .bind(to)
        .fetch_one(&mut **tx)
        .await
        .map_err(Into::into)
    }

    /// History of a project, oldest first
    pub async fn find_for_project(project_id: ImpulsaProjectId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_project_state_transitions WHERE impulsa_project_id = $1 ORDER BY created_at, id",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
