use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::HashSet;

use crate::common::utils::resolve_slug;
use crate::common::validation::BLANK;
use crate::common::{OrganizationId, ValidationErrors};

/// Organization - tenant that owns brand settings and scoped content
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub active: bool,
    pub settings: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn validate_name(name: &str) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if name.trim().is_empty() {
            errors.add("name", BLANK);
        }
        errors
    }

    /// Setting value by key, if present.
    pub fn setting(&self, key: &str) -> Option<&JsonValue> {
        self.settings.get(key)
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Organization {
    pub async fn find_by_id(id: OrganizationId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_slug(slug: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM organizations WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_active(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM organizations WHERE active = true ORDER BY name")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    async fn taken_slugs(base: &str, pool: &PgPool) -> Result<HashSet<String>> {
        let slugs: Vec<String> =
            sqlx::query_scalar("SELECT slug FROM organizations WHERE slug = $1 OR slug LIKE $2")
                .bind(base)
                .bind(format!("{}-%", base))
                .fetch_all(pool)
                .await?;
        Ok(slugs.into_iter().collect())
    }

    /// Create an organization with a unique slug derived from its name
    pub async fn create(
        name: &str,
        description: Option<&str>,
        pool: &PgPool,
    ) -> Result<Self> {
        Self::validate_name(name).into_result()?;

        let name = name.trim();
        let base = crate::common::utils::parameterize(name);
        let taken = Self::taken_slugs(&base, pool).await?;
        let slug = resolve_slug(&[name], &taken).unwrap_or_else(|| OrganizationId::new().to_string());

        let org = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO organizations (id, name, slug, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(OrganizationId::new())
        .bind(name)
        .bind(&slug)
        .bind(description)
        .fetch_one(pool)
        .await?;

        tracing::info!(organization_id = %org.id, slug = %org.slug, "organization created");
        Ok(org)
    }

    pub async fn set_active(id: OrganizationId, active: bool, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE organizations SET active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(active)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn update_settings(
        id: OrganizationId,
        settings: &JsonValue,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE organizations SET settings = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(settings)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
