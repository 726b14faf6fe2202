use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::common::{UserId, UserStatsId, ValidationErrors};
use crate::domains::gamification::awarder::BadgeAwarder;
use crate::domains::gamification::levels::{level_name, streak_bonus, xp_for_level, MAX_LEVEL};

use super::badge::Badge;
use super::point::{Point, PointSource};

/// Points, level and activity streak of one user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserStats {
    pub id: UserStatsId,
    pub user_id: UserId,
    pub total_points: i32,
    pub level: i32,
    pub xp: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_active_date: Option<NaiveDate>,
    /// Activity counters (`proposals_created`, `comments_posted`, ...)
    pub stats: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderboardPeriod {
    #[default]
    AllTime,
    Today,
    Week,
    Month,
}

impl LeaderboardPeriod {
    /// First activity date counted, if the period is bounded.
    pub fn since(self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::AllTime => None,
            Self::Today => Some(today),
            Self::Week => today.checked_sub_days(Days::new(7)),
            Self::Month => today.checked_sub_days(Days::new(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub level: i32,
    pub level_name: String,
    pub total_points: i32,
    pub xp: i32,
    pub xp_to_next_level: i32,
    pub level_progress: f64,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub badges_count: i64,
    pub leaderboard_position: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub level: i32,
    pub total_points: i32,
}

/// Outcome of `UserStats::earn_points`.
#[derive(Debug, Clone)]
pub struct PointsEarned {
    pub point: Point,
    pub stats: UserStats,
    pub leveled_up: bool,
    pub streak_bonus: Option<Point>,
    /// Badges unlocked by this award
    pub badges: Vec<Badge>,
}

impl UserStats {
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: UserStatsId::new(),
            user_id,
            total_points: 0,
            level: 1,
            xp: 0,
            current_streak: 0,
            longest_streak: 0,
            last_active_date: None,
            stats: JsonValue::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_non_negative("total_points", Some(self.total_points.into()));
        errors.require_non_negative("level", Some(self.level.into()));
        errors.require_non_negative("xp", Some(self.xp.into()));
        errors.require_non_negative("current_streak", Some(self.current_streak.into()));
        errors.require_non_negative("longest_streak", Some(self.longest_streak.into()));
        errors
    }

    pub fn level_name(&self) -> String {
        level_name(self.level)
    }

    /// XP missing for the next level; zero at the top level and negative
    /// when a level up is pending.
    pub fn xp_to_next_level(&self) -> i32 {
        match xp_for_level(self.level + 1) {
            Some(next) if self.level < MAX_LEVEL => next - self.xp,
            _ => 0,
        }
    }

    /// Progress through the current level, 0 to 100.
    pub fn level_progress_percentage(&self) -> f64 {
        let (Some(current), Some(next)) = (xp_for_level(self.level), xp_for_level(self.level + 1)) else {
            return 100.0;
        };
        if self.xp >= next {
            return 100.0;
        }
        let progress = f64::from(self.xp - current) / f64::from(next - current) * 100.0;
        (progress.max(0.0) * 100.0).round() / 100.0
    }

    pub fn should_level_up(&self) -> bool {
        self.level < MAX_LEVEL && xp_for_level(self.level + 1).is_some_and(|next| self.xp >= next)
    }

    /// Raises the level as far as the XP allows. Returns whether it changed.
    pub fn check_level_up(&mut self) -> bool {
        let before = self.level;
        while self.should_level_up() {
            self.level += 1;
        }
        self.level != before
    }

    /// Counts activity on `today` toward the streak. Returns the bonus due
    /// when the streak reaches a weekly milestone.
    pub fn update_streak(&mut self, today: NaiveDate) -> Option<i32> {
        match self.last_active_date {
            Some(last) if last == today => return None,
            Some(last) if last.succ_opt() == Some(today) => self.current_streak += 1,
            _ => self.current_streak = 1,
        }
        self.last_active_date = Some(today);
        self.longest_streak = self.longest_streak.max(self.current_streak);
        streak_bonus(self.current_streak)
    }

    fn add_points(&mut self, amount: i32) {
        self.total_points += amount;
        self.xp += amount;
    }

    /// Counter stored under `key` in the activity stats.
    pub fn counter(&self, key: &str) -> i64 {
        self.stats.get(key).and_then(JsonValue::as_i64).unwrap_or(0)
    }

    pub fn summary(&self, badges_count: i64, leaderboard_position: i64) -> StatsSummary {
        StatsSummary {
            level: self.level,
            level_name: self.level_name(),
            total_points: self.total_points,
            xp: self.xp,
            xp_to_next_level: self.xp_to_next_level(),
            level_progress: self.level_progress_percentage(),
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
            badges_count,
            leaderboard_position,
        }
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl UserStats {
    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM gamification_user_stats WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Stats of the user, created on first access.
    pub async fn for_user(user_id: UserId, pool: &PgPool) -> Result<Self> {
        sqlx::query(
            r#"
            INSERT INTO gamification_user_stats (id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(UserStatsId::new())
        .bind(user_id)
        .execute(pool)
        .await?;

        sqlx::query_as::<_, Self>("SELECT * FROM gamification_user_stats WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Highest scores first
    pub async fn leaderboard(
        period: LeaderboardPeriod,
        today: NaiveDate,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<LeaderboardEntry>> {
        sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT ROW_NUMBER() OVER (ORDER BY s.total_points DESC, s.created_at) AS rank,
                   s.user_id, u.first_name, u.last_name, s.level, s.total_points
            FROM gamification_user_stats s
            JOIN users u ON u.id = s.user_id
            WHERE ($1::date IS NULL OR s.last_active_date >= $1)
            ORDER BY s.total_points DESC, s.created_at
            LIMIT $2
            "#,
        )
        .bind(period.since(today))
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn by_level(level: i32, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM gamification_user_stats WHERE level = $1 ORDER BY total_points DESC",
        )
        .bind(level)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn active_today(today: NaiveDate, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM gamification_user_stats WHERE last_active_date = $1 ORDER BY total_points DESC",
        )
        .bind(today)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// 1-based rank by total points; ties share the better position.
    pub async fn leaderboard_position(&self, pool: &PgPool) -> Result<i64> {
        let ahead: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM gamification_user_stats WHERE total_points > $1",
        )
        .bind(self.total_points)
        .fetch_one(pool)
        .await?;
        Ok(ahead + 1)
    }

    /// Awards points, counts today's activity and levels up, in one
    /// transaction. A weekly streak milestone adds a bonus award. Once
    /// committed, every badge the user now qualifies for is granted.
    pub async fn earn_points(
        user_id: UserId,
        amount: i32,
        reason: &str,
        source: Option<&PointSource>,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<PointsEarned> {
        let mut earned = Self::record_points(user_id, amount, reason, source, today, pool).await?;

        earned.badges = BadgeAwarder::check_and_award(user_id, today, pool).await?;
        if !earned.badges.is_empty() {
            let level_before = earned.stats.level;
            earned.stats = Self::for_user(user_id, pool).await?;
            earned.leveled_up |= earned.stats.level != level_before;
        }
        Ok(earned)
    }

    /// `earn_points` without the badge check.
    pub(crate) async fn record_points(
        user_id: UserId,
        amount: i32,
        reason: &str,
        source: Option<&PointSource>,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<PointsEarned> {
        let mut stats = Self::for_user(user_id, pool).await?;
        let mut tx = pool.begin().await?;

        stats = sqlx::query_as::<_, Self>("SELECT * FROM gamification_user_stats WHERE id = $1 FOR UPDATE")
            .bind(stats.id)
            .fetch_one(&mut *tx)
            .await?;

        let point = Point::insert(&mut tx, user_id, amount, reason, source).await?;
        stats.add_points(amount);

        let streak_bonus = match stats.update_streak(today) {
            Some(bonus) => {
                let reason = format!("Racha de {} días", stats.current_streak);
                let bonus_point = Point::insert(&mut tx, user_id, bonus, &reason, None).await?;
                stats.add_points(bonus);
                Some(bonus_point)
            }
            None => None,
        };
        let leveled_up = stats.check_level_up();
        stats.validate().into_result()?;

        let stats = sqlx::query_as::<_, Self>(
            r#"
            UPDATE gamification_user_stats
            SET total_points = $2, level = $3, xp = $4, current_streak = $5,
                longest_streak = $6, last_active_date = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(stats.id)
        .bind(stats.total_points)
        .bind(stats.level)
        .bind(stats.xp)
        .bind(stats.current_streak)
        .bind(stats.longest_streak)
        .bind(stats.last_active_date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount,
            reason,
            total_points = stats.total_points,
            level = stats.level,
            "points earned"
        );
        if leveled_up {
            tracing::info!(user_id = %user_id, level = stats.level, "level up");
        }

        Ok(PointsEarned {
            point,
            stats,
            leveled_up,
            streak_bonus,
            badges: Vec::new(),
        })
    }

    /// Adds `by` to an activity counter.
    pub async fn increment_counter(&self, key: &str, by: i64, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE gamification_user_stats
            SET stats = jsonb_set(stats, ARRAY[$2]::text[], to_jsonb(COALESCE((stats->>$2)::bigint, 0) + $3)),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(key)
        .bind(by)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(level: i32, xp: i32) -> UserStats {
        let mut s = UserStats::new(UserId::new());
        s.level = level;
        s.xp = xp;
        s
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn totals_cannot_be_negative() {
        let mut s = stats(1, 0);
        assert!(s.validate().is_empty());
        s.level = -1;
        s.current_streak = -1;
        let errors = s.validate();
        assert!(!errors.get("level").is_empty());
        assert!(!errors.get("current_streak").is_empty());
    }

    #[test]
    fn xp_to_next_level() {
        assert_eq!(stats(1, 50).xp_to_next_level(), 50);
        assert_eq!(stats(25, 30_000).xp_to_next_level(), 0);
        assert!(stats(1, 200).xp_to_next_level() <= 0);
    }

    #[test]
    fn level_progress() {
        assert_eq!(stats(1, 50).level_progress_percentage(), 50.0);
        assert_eq!(stats(2, 100).level_progress_percentage(), 0.0);
        assert_eq!(stats(1, 100).level_progress_percentage(), 100.0);
        assert_eq!(stats(2, 175).level_progress_percentage(), 50.0);
        assert_eq!(stats(25, 0).level_progress_percentage(), 100.0);
    }

    #[test]
    fn levels_up_as_far_as_xp_allows() {
        let mut s = stats(1, 100);
        assert!(s.should_level_up());
        assert!(s.check_level_up());
        assert_eq!(s.level, 2);

        let mut s = stats(1, 500);
        s.check_level_up();
        assert_eq!(s.level, 4);

        let mut s = stats(1, 50);
        assert!(!s.check_level_up());
        assert_eq!(s.level, 1);

        assert!(!stats(25, 50_000).should_level_up());
    }

    #[test]
    fn streaks() {
        let today = date("2024-01-15");

        let mut s = stats(1, 0);
        assert_eq!(s.update_streak(today), None);
        assert_eq!((s.current_streak, s.last_active_date), (1, Some(today)));

        let mut s = stats(1, 0);
        s.last_active_date = Some(today);
        s.current_streak = 5;
        s.update_streak(today);
        assert_eq!(s.current_streak, 5);

        let mut s = stats(1, 0);
        s.last_active_date = Some(date("2024-01-14"));
        s.current_streak = 10;
        s.longest_streak = 9;
        s.update_streak(today);
        assert_eq!((s.current_streak, s.longest_streak), (11, 11));

        let mut s = stats(1, 0);
        s.last_active_date = Some(date("2024-01-12"));
        s.current_streak = 5;
        s.longest_streak = 20;
        s.update_streak(today);
        assert_eq!((s.current_streak, s.longest_streak), (1, 20));
    }

    #[test]
    fn seventh_day_pays_a_bonus() {
        let mut s = stats(1, 0);
        s.last_active_date = Some(date("2024-01-14"));
        s.current_streak = 6;
        assert_eq!(s.update_streak(date("2024-01-15")), Some(50));
        assert_eq!(s.current_streak, 7);
    }

    #[test]
    fn summary_and_counters() {
        let mut s = stats(5, 1000);
        s.total_points = 1000;
        s.stats = serde_json::json!({"proposals_created": 3});
        let summary = s.summary(2, 1);
        assert_eq!(summary.level_name, "Defensor");
        assert_eq!(summary.badges_count, 2);
        assert_eq!(summary.xp_to_next_level, 500);
        assert_eq!(s.counter("proposals_created"), 3);
        assert_eq!(s.counter("comments_posted"), 0);
    }

    #[test]
    fn leaderboard_periods() {
        let today = date("2024-01-15");
        assert_eq!(LeaderboardPeriod::AllTime.since(today), None);
        assert_eq!(LeaderboardPeriod::Today.since(today), Some(today));
        assert_eq!(LeaderboardPeriod::Week.since(today), Some(date("2024-01-08")));
    }
}
