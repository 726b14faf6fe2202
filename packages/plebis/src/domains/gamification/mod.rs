//! Gamification domain - points, levels, activity streaks and badges

pub mod awarder;
pub mod levels;
pub mod models;

pub use awarder::BadgeAwarder;
pub use models::badge::{Badge, NewBadge, UserMetrics};
pub use models::point::{Point, PointSource};
pub use models::user_stats::{LeaderboardPeriod, PointsEarned, UserStats};
