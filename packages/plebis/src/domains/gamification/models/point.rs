use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::{PointId, UserId, ValidationErrors};

/// Record a point award refers to, e.g. the proposal that earned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSource {
    pub source_type: String,
    pub source_id: Uuid,
}

impl PointSource {
    pub fn new(source_type: impl Into<String>, source_id: Uuid) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
        }
    }
}

/// One award of points to a user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Point {
    pub id: PointId,
    pub user_id: UserId,
    pub amount: i32,
    pub reason: String,
    pub source_type: Option<String>,
    pub source_id: Option<Uuid>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

pub fn validate_award(amount: i32, reason: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if amount <= 0 {
        errors.add("amount", "must be greater than 0");
    }
    errors.require_present("reason", Some(reason));
    errors
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Point {
    pub(crate) async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        amount: i32,
        reason: &str,
        source: Option<&PointSource>,
    ) -> Result<Self> {
        validate_award(amount, reason).into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO gamification_points (id, user_id, amount, reason, source_type, source_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(PointId::new())
        .bind(user_id)
        .bind(amount)
        .bind(reason)
        .bind(source.map(|s| s.source_type.as_str()))
        .bind(source.map(|s| s.source_id))
        .bind(json!({}))
        .fetch_one(&mut **tx)
        .await
        .map_err(Into::into)
    }

    /// Most recent awards first
    pub async fn find_for_user(user_id: UserId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM gamification_points WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_for_source(source: &PointSource, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM gamification_points WHERE source_type = $1 AND source_id = $2 ORDER BY created_at DESC",
        )
        .bind(&source.source_type)
        .bind(source.source_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
