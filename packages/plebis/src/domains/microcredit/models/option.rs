use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::validation::MUST_EXIST;
use crate::common::{MicrocreditId, MicrocreditOptionId, ValidationErrors};

/// Destination a lender can choose for their loan. Options nest through
/// `parent_id`; deleting a parent deletes its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MicrocreditOption {
    pub id: MicrocreditOptionId,
    pub microcredit_id: MicrocreditId,
    pub name: String,
    pub parent_id: Option<MicrocreditOptionId>,
    pub intern_code: Option<String>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewMicrocreditOption {
    #[builder(default)]
    pub microcredit_id: Option<MicrocreditId>,
    pub name: String,
    #[builder(default)]
    pub parent_id: Option<MicrocreditOptionId>,
    #[builder(default)]
    pub intern_code: Option<String>,
}

impl NewMicrocreditOption {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        if self.microcredit_id.is_none() {
            errors.add("microcredit", MUST_EXIST);
        }
        errors
    }
}

/// Option with its nested children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionNode {
    #[serde(flatten)]
    pub option: MicrocreditOption,
    pub children: Vec<OptionNode>,
}

/// Nests a flat list of options under their parents. Options whose parent
/// is missing from the list are treated as roots.
pub fn build_tree(options: &[MicrocreditOption]) -> Vec<OptionNode> {
    fn children_of(parent: Option<MicrocreditOptionId>, options: &[MicrocreditOption]) -> Vec<OptionNode> {
        options
            .iter()
            .filter(|o| o.parent_id == parent)
            .map(|o| OptionNode {
                option: o.clone(),
                children: children_of(Some(o.id), options),
            })
            .collect()
    }

    let mut roots = children_of(None, options);
    for orphan in options.iter().filter(|o| {
        o.parent_id
            .is_some_and(|p| !options.iter().any(|candidate| candidate.id == p))
    }) {
        roots.push(OptionNode {
            option: orphan.clone(),
            children: children_of(Some(orphan.id), options),
        });
    }
    roots
}

// =============================================================================
// SQL Queries
// =============================================================================

impl MicrocreditOption {
    pub async fn find_by_id(id: MicrocreditOptionId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM microcredit_options WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn create(new: &NewMicrocreditOption, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO microcredit_options (id, microcredit_id, name, parent_id, intern_code)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(MicrocreditOptionId::new())
        .bind(new.microcredit_id)
        .bind(&new.name)
        .bind(new.parent_id)
        .bind(&new.intern_code)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn rename(&self, name: &str, pool: &PgPool) -> Result<Self> {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(name));
        errors.into_result()?;

        sqlx::query_as::<_, Self>(
            "UPDATE microcredit_options SET name = $2 WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Deletes the option; children go with it through the cascading key
    pub async fn delete(id: MicrocreditOptionId, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM microcredit_options WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn find_for_microcredit(microcredit_id: MicrocreditId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM microcredit_options WHERE microcredit_id = $1 ORDER BY name",
        )
        .bind(microcredit_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_root_parents(microcredit_id: MicrocreditId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM microcredit_options
            WHERE microcredit_id = $1 AND parent_id IS NULL
            ORDER BY name
            "#,
        )
        .bind(microcredit_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Leaf options, the ones a lender can actually pick
    pub async fn find_without_children(microcredit_id: MicrocreditId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT o.* FROM microcredit_options o
            WHERE o.microcredit_id = $1
              AND NOT EXISTS (SELECT 1 FROM microcredit_options c WHERE c.parent_id = o.id)
            ORDER BY o.name
            "#,
        )
        .bind(microcredit_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn children(&self, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM microcredit_options WHERE parent_id = $1 ORDER BY name",
        )
        .bind(self.id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn tree(microcredit_id: MicrocreditId, pool: &PgPool) -> Result<Vec<OptionNode>> {
        let options = Self::find_for_microcredit(microcredit_id, pool).await?;
        Ok(build_tree(&options))
    }
}
