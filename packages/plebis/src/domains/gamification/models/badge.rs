use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::validation::{NOT_INCLUDED, TAKEN};
use crate::common::{BadgeId, UserId, ValidationErrors};

use super::point::PointSource;
use super::user_stats::UserStats;

pub const TIERS: [&str; 5] = ["bronze", "silver", "gold", "platinum", "diamond"];

/// Achievement awarded when a user's metrics meet its criteria.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Badge {
    pub id: BadgeId,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: String,
    pub points_reward: i32,
    /// `{"metric": {"gte": n}, "registered_before": "YYYY-MM-DD"}`
    pub criteria: JsonValue,
    pub category: Option<String>,
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewBadge {
    pub key: String,
    pub name: String,
    pub icon: String,
    #[builder(default)]
    pub description: Option<String>,
    #[builder(default)]
    pub points_reward: i32,
    #[builder(default = JsonValue::Object(Default::default()))]
    pub criteria: JsonValue,
    #[builder(default)]
    pub category: Option<String>,
    #[builder(default)]
    pub tier: Option<String>,
}

impl NewBadge {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("key", Some(&self.key));
        errors.require_present("name", Some(&self.name));
        errors.require_present("icon", Some(&self.icon));
        if let Some(tier) = &self.tier {
            if !TIERS.contains(&tier.as_str()) {
                errors.add("tier", NOT_INCLUDED);
            }
        }
        errors
    }
}

/// Figures badge criteria are checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMetrics {
    pub proposals_created: i64,
    pub votes_cast: i64,
    pub comments_posted: i64,
    pub streak_days: i64,
    pub level: i64,
    pub registered_at: Option<DateTime<Utc>>,
}

impl UserMetrics {
    pub fn get(&self, metric: &str) -> Option<i64> {
        match metric {
            "proposals_created" => Some(self.proposals_created),
            "votes_cast" => Some(self.votes_cast),
            "comments_posted" => Some(self.comments_posted),
            "streak_days" => Some(self.streak_days),
            "level" => Some(self.level),
            _ => None,
        }
    }

    pub async fn load(user_id: UserId, pool: &PgPool) -> Result<Self> {
        let stats = UserStats::for_user(user_id, pool).await?;
        let votes_cast: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM votes WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        let registered_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;

        Ok(Self {
            proposals_created: stats.counter("proposals_created"),
            votes_cast,
            comments_posted: stats.counter("comments_posted"),
            streak_days: stats.current_streak.into(),
            level: stats.level.into(),
            registered_at,
        })
    }
}

fn condition_met(condition: &JsonValue, value: i64) -> bool {
    let Some(condition) = condition.as_object() else {
        return false;
    };
    condition.iter().all(|(op, bound)| {
        let Some(bound) = bound.as_i64() else {
            return false;
        };
        match op.as_str() {
            "gte" => value >= bound,
            "gt" => value > bound,
            "lte" => value <= bound,
            "lt" => value < bound,
            "eq" => value == bound,
            _ => false,
        }
    })
}

impl Badge {
    /// Source recorded on the points its reward pays.
    pub fn point_source(&self) -> PointSource {
        PointSource::new("Badge", self.id.into_uuid())
    }

    /// Every criterion holds for `metrics`. Empty criteria always hold;
    /// unknown metrics never do.
    pub fn criteria_met(&self, metrics: &UserMetrics) -> bool {
        let Some(criteria) = self.criteria.as_object() else {
            return false;
        };
        criteria.iter().all(|(metric, condition)| {
            if metric == "registered_before" {
                let date = condition
                    .as_str()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
                return match (date, metrics.registered_at) {
                    (Some(date), Some(at)) => at.date_naive() < date,
                    _ => false,
                };
            }
            metrics
                .get(metric)
                .is_some_and(|value| condition_met(condition, value))
        })
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Badge {
    pub async fn find_by_key(key: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM gamification_badges WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM gamification_badges ORDER BY category, key")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn create(new: &NewBadge, pool: &PgPool) -> Result<Self> {
        let mut errors = new.validate();
        if Self::find_by_key(&new.key, pool).await?.is_some() {
            errors.add("key", TAKEN);
        }
        errors.into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO gamification_badges
                (id, key, name, description, icon, points_reward, criteria, category, tier)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(BadgeId::new())
        .bind(&new.key)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.icon)
        .bind(new.points_reward)
        .bind(&new.criteria)
        .bind(&new.category)
        .bind(&new.tier)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn earned_by(user_id: UserId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT b.* FROM gamification_badges b
            JOIN gamification_user_badges ub ON ub.badge_id = b.id
            WHERE ub.user_id = $1
            ORDER BY ub.earned_at
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_earned_by(user_id: UserId, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM gamification_user_badges WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Grants the badge once. Returns false when the user already had it.
    pub async fn award(&self, user_id: UserId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO gamification_user_badges (user_id, badge_id, earned_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, badge_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.id)
        .execute(pool)
        .await?;

        let awarded = result.rows_affected() > 0;
        if awarded {
            tracing::info!(user_id = %user_id, badge = %self.key, "badge awarded");
        }
        Ok(awarded)
    }
}
