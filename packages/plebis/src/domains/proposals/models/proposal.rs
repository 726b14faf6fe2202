use anyhow::Result;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;

use crate::common::{ProposalId, ValidationErrors};

/// Months a proposal collects supports.
pub const LIFETIME_MONTHS: u32 = 3;

pub const REDDIT_THRESHOLD_RATIO: f64 = 0.002;
pub const MONTHLY_EMAIL_RATIO: f64 = 0.02;
pub const AGORA_VOTING_RATIO: f64 = 0.1;

/// Hotness points per day since creation.
pub const HOTNESS_PER_DAY: i64 = 1000;

/// A citizen proposal collecting supports.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proposal {
    pub id: ProposalId,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub reddit_url: Option<String>,
    pub votes: Option<i32>,
    pub supports_count: Option<i32>,
    pub hotness: Option<i64>,
    pub reddit_threshold: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Orderings available to `Proposal::filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProposalOrder {
    Recent,
    #[default]
    Popular,
    Time,
    Hot,
}

impl ProposalOrder {
    fn order_by(self) -> &'static str {
        match self {
            Self::Recent => "created_at DESC",
            Self::Popular => "supports_count DESC",
            Self::Time => "created_at ASC",
            Self::Hot => "hotness DESC",
        }
    }
}

impl fmt::Display for ProposalOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recent => write!(f, "recent"),
            Self::Popular => write!(f, "popular"),
            Self::Time => write!(f, "time"),
            Self::Hot => write!(f, "hot"),
        }
    }
}

impl FromStr for ProposalOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(Self::Recent),
            "popular" => Ok(Self::Popular),
            "time" => Ok(Self::Time),
            "hot" => Ok(Self::Hot),
            _ => Err(anyhow::anyhow!("Invalid proposal filter: {}", s)),
        }
    }
}

fn required_votes(confirmed_users: i64, ratio: f64) -> i64 {
    (confirmed_users as f64 * ratio).round() as i64
}

pub fn reddit_required_votes(confirmed_users: i64) -> i64 {
    required_votes(confirmed_users, REDDIT_THRESHOLD_RATIO)
}

pub fn monthly_email_required_votes(confirmed_users: i64) -> i64 {
    required_votes(confirmed_users, MONTHLY_EMAIL_RATIO)
}

pub fn agoravoting_required_votes(confirmed_users: i64) -> i64 {
    required_votes(confirmed_users, AGORA_VOTING_RATIO)
}

/// `supports + days * 1000`
pub fn hotness(supports_count: i64, days_since_created: i64) -> i64 {
    supports_count + days_since_created * HOTNESS_PER_DAY
}

fn lifetime_end(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at
        .checked_add_months(Months::new(LIFETIME_MONTHS))
        .unwrap_or(created_at)
}

impl Proposal {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(&self.title));
        errors.require_present("description", Some(&self.description));
        errors.require_non_negative("votes", self.votes.map(i64::from));
        errors.require_non_negative("supports_count", self.supports_count.map(i64::from));
        errors.require_non_negative("hotness", self.hotness);
        errors
    }

    fn votes(&self) -> i64 {
        self.votes.unwrap_or(0).into()
    }

    fn supports(&self) -> i64 {
        self.supports_count.unwrap_or(0).into()
    }

    pub fn finishes_at(&self) -> DateTime<Utc> {
        lifetime_end(self.created_at)
    }

    pub fn finished(&self, now: DateTime<Utc>) -> bool {
        self.finishes_at() < now
    }

    pub fn days_since_created(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    pub fn current_hotness(&self, now: DateTime<Utc>) -> i64 {
        hotness(self.supports(), self.days_since_created(now))
    }

    pub fn reddit_required_votes_reached(&self, confirmed_users: i64) -> bool {
        self.votes() >= reddit_required_votes(confirmed_users)
    }

    pub fn monthly_email_required_votes_reached(&self, confirmed_users: i64) -> bool {
        self.votes() >= monthly_email_required_votes(confirmed_users)
    }

    pub fn agoravoting_required_votes_reached(&self, confirmed_users: i64) -> bool {
        self.votes() >= agoravoting_required_votes(confirmed_users)
    }

    /// Share of confirmed users supporting, in percent.
    pub fn support_percentage(&self, confirmed_users: i64) -> f64 {
        if confirmed_users == 0 {
            return 0.0;
        }
        self.supports() as f64 / confirmed_users as f64 * 100.0
    }

    /// Votes still missing for the monthly email. Negative once exceeded.
    pub fn remaining_endorsements_for_approval(&self, confirmed_users: i64) -> i64 {
        monthly_email_required_votes(confirmed_users) - self.votes()
    }

    /// Finished without reaching the voting threshold.
    pub fn discarded(&self, now: DateTime<Utc>, confirmed_users: i64) -> bool {
        self.finished(now) && !self.agoravoting_required_votes_reached(confirmed_users)
    }

    pub fn supportable(&self, now: DateTime<Utc>, confirmed_users: i64, already_supported: bool) -> bool {
        !self.finished(now) && !self.discarded(now, confirmed_users) && !already_supported
    }

    /// Runs before every save: the reddit flag is sticky once reached.
    pub fn prepare_for_save(&mut self, confirmed_users: i64) {
        if !self.reddit_threshold && self.reddit_required_votes_reached(confirmed_users) {
            self.reddit_threshold = true;
        }
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Proposal {
    pub async fn find_by_id(id: ProposalId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM proposals WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Validate, apply the reddit flag and persist
    pub async fn save(mut self, pool: &PgPool) -> Result<Self> {
        self.validate().into_result()?;
        let confirmed = crate::domains::users::User::count_confirmed(pool).await?;
        self.prepare_for_save(confirmed);

        let proposal = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO proposals (
                id, title, description, image_url, reddit_url, votes, supports_count,
                hotness, reddit_threshold, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                image_url = EXCLUDED.image_url,
                reddit_url = EXCLUDED.reddit_url,
                votes = EXCLUDED.votes,
                hotness = EXCLUDED.hotness,
                reddit_threshold = EXCLUDED.reddit_threshold,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.image_url)
        .bind(&self.reddit_url)
        .bind(self.votes)
        .bind(self.supports_count.unwrap_or(0))
        .bind(self.hotness)
        .bind(self.reddit_threshold)
        .bind(self.created_at)
        .fetch_one(pool)
        .await?;

        Ok(proposal)
    }

    async fn ordered(where_clause: &str, order: &str, pool: &PgPool) -> Result<Vec<Self>> {
        let sql = format!("SELECT * FROM proposals {} ORDER BY {}", where_clause, order);
        sqlx::query_as::<_, Self>(&sql)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_reddit(pool: &PgPool) -> Result<Vec<Self>> {
        Self::ordered("WHERE reddit_threshold = true", "created_at DESC", pool).await
    }

    pub async fn find_recent(pool: &PgPool) -> Result<Vec<Self>> {
        Self::ordered("", ProposalOrder::Recent.order_by(), pool).await
    }

    pub async fn find_popular(pool: &PgPool) -> Result<Vec<Self>> {
        Self::ordered("", ProposalOrder::Popular.order_by(), pool).await
    }

    pub async fn find_by_time(pool: &PgPool) -> Result<Vec<Self>> {
        Self::ordered("", ProposalOrder::Time.order_by(), pool).await
    }

    pub async fn find_hot(pool: &PgPool) -> Result<Vec<Self>> {
        Self::ordered("", ProposalOrder::Hot.order_by(), pool).await
    }

    /// Created within the last three months
    pub async fn find_active(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM proposals WHERE created_at > $1 ORDER BY created_at DESC",
        )
        .bind(now - Months::new(LIFETIME_MONTHS))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_finished(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM proposals WHERE created_at <= $1 ORDER BY created_at DESC",
        )
        .bind(now - Months::new(LIFETIME_MONTHS))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Reddit proposals ordered by `filter` (popular when absent)
    pub async fn filter(filter: Option<&str>, pool: &PgPool) -> Result<Vec<Self>> {
        let order = filter
            .and_then(|f| f.parse::<ProposalOrder>().ok())
            .unwrap_or_default();
        Self::ordered("WHERE reddit_threshold = true", order.order_by(), pool).await
    }

    /// Supports created before the proposal finished
    pub async fn count_before_finish(&self, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM supports WHERE proposal_id = $1 AND created_at < $2",
        )
        .bind(self.id)
        .bind(self.finishes_at())
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn supported_by(&self, user_id: crate::common::UserId, pool: &PgPool) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM supports WHERE proposal_id = $1 AND user_id = $2)",
        )
        .bind(self.id)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Recompute and persist hotness for every proposal
    pub async fn refresh_hotness(now: DateTime<Utc>, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE proposals
            SET hotness = COALESCE(supports_count, 0) + FLOOR(EXTRACT(EPOCH FROM ($1 - created_at)) / 86400)::BIGINT * $2
            "#,
        )
        .bind(now)
        .bind(HOTNESS_PER_DAY)
        .execute(pool)
        .await?;

        tracing::info!(updated = result.rows_affected(), "proposal hotness refreshed");
        Ok(result.rows_affected())
    }
}
