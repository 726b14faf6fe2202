use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::common::utils::{parameterize, resolve_slug};
use crate::common::validation::TAKEN;
use crate::common::{CategoryId, PostId, ValidationErrors};

/// Blog category, addressable by slug
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category with the number of posts filed under it
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryWithCount {
    #[sqlx(flatten)]
    pub category: Category,
    pub posts_count: i64,
}

impl Category {
    pub fn validate(name: &str) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(name));
        errors
    }

    /// Slug to store: keeps `current` unless the name changed or it is blank.
    pub fn next_slug(
        name: &str,
        current: Option<&str>,
        name_changed: bool,
        taken: &HashSet<String>,
    ) -> Option<String> {
        match current {
            Some(slug) if !slug.trim().is_empty() && !name_changed => Some(slug.to_string()),
            _ => resolve_slug(&[name], taken),
        }
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Category {
    pub async fn find_by_id(id: CategoryId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM categories WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_slug(slug: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    async fn name_taken(name: &str, except: Option<CategoryId>, pool: &PgPool) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM categories
                WHERE LOWER(name) = LOWER($1) AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(name)
        .bind(except)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    async fn taken_slugs(name: &str, except: Option<CategoryId>, pool: &PgPool) -> Result<HashSet<String>> {
        let base = parameterize(name);
        let slugs: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT slug FROM categories
            WHERE (slug = $1 OR slug LIKE $2) AND ($3::uuid IS NULL OR id <> $3)
            "#,
        )
        .bind(&base)
        .bind(format!("{}-%", base))
        .bind(except)
        .fetch_all(pool)
        .await?;
        Ok(slugs.into_iter().collect())
    }

    async fn check_name(name: &str, except: Option<CategoryId>, pool: &PgPool) -> Result<()> {
        let mut errors = Self::validate(name);
        if errors.is_empty() && Self::name_taken(name, except, pool).await? {
            errors.add("name", TAKEN);
        }
        errors.into_result()?;
        Ok(())
    }

    pub async fn create(name: &str, pool: &PgPool) -> Result<Self> {
        Self::check_name(name, None, pool).await?;
        let taken = Self::taken_slugs(name, None, pool).await?;
        let slug = Self::next_slug(name, None, true, &taken)
            .unwrap_or_else(|| CategoryId::new().to_string());

        let category = sqlx::query_as::<_, Self>(
            "INSERT INTO categories (id, name, slug) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(CategoryId::new())
        .bind(name.trim())
        .bind(&slug)
        .fetch_one(pool)
        .await?;

        tracing::debug!(category_id = %category.id, slug = %category.slug, "category created");
        Ok(category)
    }

    /// Rename, regenerating the slug from the new name
    pub async fn rename(&self, name: &str, pool: &PgPool) -> Result<Self> {
        Self::check_name(name, Some(self.id), pool).await?;
        let changed = name.trim() != self.name;
        let taken = Self::taken_slugs(name, Some(self.id), pool).await?;
        let slug = Self::next_slug(name, Some(&self.slug), changed, &taken)
            .unwrap_or_else(|| self.slug.clone());

        sqlx::query_as::<_, Self>(
            "UPDATE categories SET name = $2, slug = $3, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(name.trim())
        .bind(&slug)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn delete(id: CategoryId, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn posts_count(&self, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM categories_posts WHERE category_id = $1")
            .bind(self.id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn attach_post(&self, post_id: PostId, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "INSERT INTO categories_posts (category_id, post_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(self.id)
        .bind(post_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn detach_post(&self, post_id: PostId, pool: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM categories_posts WHERE category_id = $1 AND post_id = $2")
            .bind(self.id)
            .bind(post_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Categories with at least one post
    pub async fn find_active(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT c.* FROM categories c
            WHERE EXISTS (SELECT 1 FROM categories_posts cp WHERE cp.category_id = c.id)
            ORDER BY c.name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_inactive(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT c.* FROM categories c
            WHERE NOT EXISTS (SELECT 1 FROM categories_posts cp WHERE cp.category_id = c.id)
            ORDER BY c.name
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_alphabetical(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM categories ORDER BY name ASC")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_post_count(pool: &PgPool) -> Result<Vec<CategoryWithCount>> {
        sqlx::query_as::<_, CategoryWithCount>(
            r#"
            SELECT c.*, COUNT(cp.post_id) AS posts_count
            FROM categories c
            LEFT JOIN categories_posts cp ON cp.category_id = c.id
            GROUP BY c.id
            ORDER BY posts_count DESC, c.name ASC
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
