use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;

use crate::common::utils::iban_valid;
use crate::common::validation::INVALID;
use crate::common::{MicrocreditId, ValidationErrors};

/// Fundraising campaign backed by member loans.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Microcredit {
    pub id: MicrocreditId,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// One `amount: count` line per loan amount offered
    pub limits: Option<String>,
    pub total_goal: Option<i32>,
    /// Account lenders transfer to
    pub account_number: Option<String>,
    /// Loans of this campaign may be renewed into a later one
    pub renewable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewMicrocredit {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[builder(default)]
    pub limits: Option<String>,
    #[builder(default)]
    pub total_goal: Option<i32>,
    #[builder(default)]
    pub account_number: Option<String>,
    #[builder(default)]
    pub renewable: bool,
}

impl NewMicrocredit {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(&self.title));
        if self.ends_at <= self.starts_at {
            errors.add("ends_at", "must be after starts_at");
        }
        errors.require_non_negative("total_goal", self.total_goal.map(i64::from));
        if let Some(account) = self.account_number.as_deref().filter(|a| !a.trim().is_empty()) {
            if !iban_valid(account) {
                errors.add("account_number", INVALID);
            }
        }
        errors
    }
}

/// Loan amount → number of loans accepted. Malformed lines are skipped.
pub fn parse_limits(limits: &str) -> BTreeMap<i32, i32> {
    limits
        .lines()
        .filter_map(|line| {
            let (amount, count) = line.split_once(':')?;
            let amount = amount.trim().trim_end_matches('€').trim().parse().ok()?;
            let count = count.trim().parse().ok()?;
            Some((amount, count))
        })
        .collect()
}

impl Microcredit {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    pub fn limits(&self) -> BTreeMap<i32, i32> {
        self.limits.as_deref().map(parse_limits).unwrap_or_default()
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Microcredit {
    pub async fn find_by_id(id: MicrocreditId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM microcredits WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_active(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM microcredits WHERE starts_at <= $1 AND ends_at >= $1 ORDER BY starts_at",
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn create(new: &NewMicrocredit, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        let microcredit = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO microcredits
                (id, title, starts_at, ends_at, limits, total_goal, account_number, renewable)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(MicrocreditId::new())
        .bind(&new.title)
        .bind(new.starts_at)
        .bind(new.ends_at)
        .bind(&new.limits)
        .bind(new.total_goal)
        .bind(&new.account_number)
        .bind(new.renewable)
        .fetch_one(pool)
        .await?;

        tracing::info!(microcredit_id = %microcredit.id, title = %microcredit.title, "microcredit created");
        Ok(microcredit)
    }
}
