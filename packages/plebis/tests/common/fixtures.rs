//! Test fixtures for creating test data.
//!
//! Every fixture derives unique emails, document ids and titles from a
//! fresh UUID so tests sharing the database never collide.

use anyhow::Result;
use chrono::Utc;
use plebis_core::common::ProposalId;
use plebis_core::domains::organizations::Organization;
use plebis_core::domains::proposals::Proposal;
use plebis_core::domains::users::{NewUser, User};
use sqlx::PgPool;
use uuid::Uuid;

/// Short unique tag for names and filters
pub fn unique_tag() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Create a confirmed user with the given first and last name
pub async fn create_test_user(pool: &PgPool, first_name: &str, last_name: &str) -> Result<User> {
    let tag = unique_tag();
    let now = Utc::now();
    let new = NewUser::builder()
        .email(format!("{}@example.org", tag))
        .first_name(first_name)
        .last_name(last_name)
        .document_vatid(tag.to_uppercase())
        .confirmed_at(Some(now))
        .sms_confirmed_at(Some(now))
        .build();
    User::insert(&new, pool).await
}

/// Create a proposal created `days_ago` days before now
pub async fn create_test_proposal(pool: &PgPool, title: &str, days_ago: i64) -> Result<Proposal> {
    let created_at = Utc::now() - chrono::Duration::days(days_ago);
    Proposal {
        id: ProposalId::new(),
        title: title.to_string(),
        description: "Test description".to_string(),
        image_url: None,
        reddit_url: None,
        votes: Some(0),
        supports_count: Some(0),
        hotness: Some(0),
        reddit_threshold: false,
        created_at,
        updated_at: created_at,
    }
    .save(pool)
    .await
}

pub async fn create_test_organization(pool: &PgPool) -> Result<Organization> {
    Organization::create(&format!("Org {}", unique_tag()), None, pool).await
}
