use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashSet;
use typed_builder::TypedBuilder;

use crate::common::utils::{parameterize, resolve_slug};
use crate::common::validation::NOT_INCLUDED;
use crate::common::{CategoryId, PostId, ValidationErrors};

use super::category::Category;

pub const STATUS_DRAFT: i32 = 0;
pub const STATUS_PUBLISHED: i32 = 1;

/// `(status, label)`
pub const STATUSES: [(i32, &str); 2] = [(STATUS_DRAFT, "Borrador"), (STATUS_PUBLISHED, "Publicado")];

/// Blog post. Deleting only stamps `deleted_at`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub status: i32,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewPost {
    pub title: String,
    #[builder(default)]
    pub content: Option<String>,
    #[builder(default)]
    pub media_url: Option<String>,
    #[builder(default = STATUS_PUBLISHED)]
    pub status: i32,
    #[builder(default)]
    pub category_ids: Vec<CategoryId>,
}

impl NewPost {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(&self.title));
        if !STATUSES.iter().any(|(s, _)| *s == self.status) {
            errors.add("status", NOT_INCLUDED);
        }
        errors
    }
}

/// `[title, title-YYYY, title-YYYY-MM, title-YYYY-MM-DD]`
pub fn slug_candidates(title: &str, at: DateTime<Utc>) -> Vec<String> {
    vec![
        title.to_string(),
        format!("{} {}", title, at.year()),
        format!("{} {} {:02}", title, at.year(), at.month()),
        format!("{} {} {:02} {:02}", title, at.year(), at.month(), at.day()),
    ]
}

impl Post {
    pub fn published(&self) -> bool {
        self.status > 0
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn status_name(&self) -> &'static str {
        STATUSES
            .iter()
            .find(|(s, _)| *s == self.status)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Post {
    /// Live post by id
    pub async fn find_by_id(id: PostId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM posts WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_slug(slug: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM posts WHERE slug = $1 AND deleted_at IS NULL")
            .bind(slug)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    async fn taken_slugs(title: &str, pool: &PgPool) -> Result<HashSet<String>> {
        let slugs: Vec<String> =
            sqlx::query_scalar("SELECT slug FROM posts WHERE slug LIKE $1")
                .bind(format!("{}%", parameterize(title)))
                .fetch_all(pool)
                .await?;
        Ok(slugs.into_iter().collect())
    }

    pub async fn create(new: &NewPost, now: DateTime<Utc>, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        let taken = Self::taken_slugs(&new.title, pool).await?;
        let slug = resolve_slug(&slug_candidates(&new.title, now), &taken)
            .unwrap_or_else(|| PostId::new().to_string());

        let mut tx = pool.begin().await?;
        let post = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO posts (id, title, content, media_url, status, slug, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(PostId::new())
        .bind(&new.title)
        .bind(&new.content)
        .bind(&new.media_url)
        .bind(new.status)
        .bind(&slug)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for category_id in &new.category_ids {
            sqlx::query("INSERT INTO categories_posts (category_id, post_id) VALUES ($1, $2)")
                .bind(category_id)
                .bind(post.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::info!(post_id = %post.id, slug = %post.slug, "post created");
        Ok(post)
    }

    pub async fn set_status(id: PostId, status: i32, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE posts SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn soft_delete(id: PostId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE posts SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn restore(id: PostId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE posts SET deleted_at = NULL, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Live posts, newest first
    pub async fn find_recent(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM posts WHERE deleted_at IS NULL ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Live posts in insertion order
    pub async fn find_created(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM posts WHERE deleted_at IS NULL ORDER BY created_at")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_drafts(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM posts WHERE deleted_at IS NULL AND status = 0 ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_published(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM posts WHERE deleted_at IS NULL AND status > 0 ORDER BY created_at DESC",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_deleted(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM posts WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_with_deleted(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM posts ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn categories(&self, pool: &PgPool) -> Result<Vec<Category>> {
        sqlx::query_as::<_, Category>(
            r#"
            SELECT c.* FROM categories c
            JOIN categories_posts cp ON cp.category_id = c.id
            WHERE cp.post_id = $1
            ORDER BY c.name
            "#,
        )
        .bind(self.id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn candidates_add_date_parts() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap();
        let candidates = slug_candidates("Duplicate Title", at);
        let taken: HashSet<String> = ["duplicate-title".to_string()].into();
        assert_eq!(
            resolve_slug(&candidates, &taken).as_deref(),
            Some("duplicate-title-2024")
        );

        let taken: HashSet<String> = [
            "duplicate-title",
            "duplicate-title-2024",
            "duplicate-title-2024-03",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            resolve_slug(&candidates, &taken).as_deref(),
            Some("duplicate-title-2024-03-07")
        );
    }

    #[test]
    fn published_means_positive_status() {
        let now = Utc::now();
        let mut post = Post {
            id: PostId::new(),
            title: "Hola".to_string(),
            content: None,
            media_url: None,
            status: STATUS_DRAFT,
            slug: "hola".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        assert!(!post.published());
        assert_eq!(post.status_name(), "Borrador");
        post.status = 2;
        assert!(post.published());
        post.status = STATUS_PUBLISHED;
        assert_eq!(post.status_name(), "Publicado");
    }

    #[test]
    fn new_post_validation() {
        let post = NewPost::builder().title("").status(7).build();
        let errors = post.validate();
        assert!(errors.includes("title", crate::common::validation::BLANK));
        assert!(errors.includes("status", NOT_INCLUDED));
        assert!(NewPost::builder().title("Hola").build().validate().is_empty());
    }
}
