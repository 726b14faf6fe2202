use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::common::{BadgeId, UserId};

use super::models::badge::{Badge, UserMetrics};
use super::models::point::PointSource;
use super::models::user_stats::UserStats;

/// Grants badges whose criteria a user's metrics meet.
pub struct BadgeAwarder;

impl BadgeAwarder {
    /// Awards every badge the user qualifies for and does not hold yet.
    ///
    /// Badge rewards are points too, so metrics are reloaded after each
    /// round until no further badge unlocks.
    pub async fn check_and_award(
        user_id: UserId,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<Vec<Badge>> {
        let badges = Badge::find_all(pool).await?;
        let mut held: HashSet<BadgeId> = Badge::earned_by(user_id, pool)
            .await?
            .into_iter()
            .map(|badge| badge.id)
            .collect();
        let mut awarded = Vec::new();

        loop {
            let metrics = UserMetrics::load(user_id, pool).await?;
            let mut unlocked = false;
            for badge in &badges {
                if held.contains(&badge.id) || !badge.criteria_met(&metrics) {
                    continue;
                }
                held.insert(badge.id);
                if Self::award_badge(user_id, badge, today, pool).await? {
                    awarded.push(badge.clone());
                    unlocked = true;
                }
            }
            if !unlocked {
                break;
            }
        }
        Ok(awarded)
    }

    /// Grants one badge and pays its points reward. Returns false when the
    /// user already had it.
    pub async fn award_badge(
        user_id: UserId,
        badge: &Badge,
        today: NaiveDate,
        pool: &PgPool,
    ) -> Result<bool> {
        if !badge.award(user_id, pool).await? {
            return Ok(false);
        }
        if badge.points_reward > 0 {
            let reason = format!("Badge earned: {}", badge.name);
            UserStats::record_points(
                user_id,
                badge.points_reward,
                &reason,
                Some(&badge.point_source()),
                today,
                pool,
            )
            .await?;
        }
        Ok(true)
    }
}
