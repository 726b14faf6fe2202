use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::common::validation::{BLANK, INVALID, TAKEN};
use crate::common::{EngineActivationId, ModelError, ValidationErrors};
use crate::domains::engines::registry;

lazy_static! {
    static ref ENGINE_NAME: Regex = Regex::new(r"^[a-z][a-z0-9_]*$").unwrap();
}

/// Whether an engine is switched on, and its configuration overrides.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EngineActivation {
    pub id: EngineActivationId,
    pub engine_name: String,
    pub enabled: bool,
    pub configuration: JsonValue,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format and registry checks on an engine name.
pub fn validate_engine_name(name: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if name.trim().is_empty() {
        errors.add("engine_name", BLANK);
        return errors;
    }
    let length = name.chars().count();
    if length < 3 {
        errors.add("engine_name", "is too short (minimum is 3 characters)");
    }
    errors.require_max_length("engine_name", name, 50);
    if !ENGINE_NAME.is_match(name) {
        errors.add("engine_name", INVALID);
    } else if !registry::exists(name) {
        errors.add("engine_name", "is not a registered engine");
    }
    errors
}

impl EngineActivation {
    /// Configured value for `key`, or `default` when unset.
    pub fn config<'a>(&'a self, key: &str, default: Option<&'a JsonValue>) -> Option<&'a JsonValue> {
        self.configuration.get(key).or(default)
    }

    /// Registry defaults overlaid with the stored configuration.
    pub fn effective_config(&self) -> JsonValue {
        let mut merged = match registry::default_config(&self.engine_name) {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        if let JsonValue::Object(overrides) = &self.configuration {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        JsonValue::Object(merged)
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl EngineActivation {
    pub async fn find_by_name(name: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM engine_activations WHERE engine_name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM engine_activations ORDER BY engine_name")
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn is_enabled(name: &str, pool: &PgPool) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM engine_activations WHERE engine_name = $1 AND enabled)",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn enabled_names(pool: &PgPool) -> Result<HashSet<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT engine_name FROM engine_activations WHERE enabled")
                .fetch_all(pool)
                .await?;
        Ok(names.into_iter().collect())
    }

    /// All non core dependencies of `name` are enabled
    pub async fn can_enable(name: &str, pool: &PgPool) -> Result<bool> {
        let enabled = Self::enabled_names(pool).await?;
        Ok(registry::dependencies_met(name, &enabled))
    }

    /// Records a disabled engine with its default configuration.
    pub async fn create(name: &str, description: Option<&str>, pool: &PgPool) -> Result<Self> {
        let mut errors = validate_engine_name(name);
        if errors.is_empty() && Self::find_by_name(name, pool).await?.is_some() {
            errors.add("engine_name", TAKEN);
        }
        errors.into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO engine_activations (id, engine_name, enabled, configuration, description)
            VALUES ($1, $2, false, $3, $4)
            RETURNING *
            "#,
        )
        .bind(EngineActivationId::new())
        .bind(name)
        .bind(registry::default_config(name))
        .bind(description)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Switches the engine on, creating its row when missing.
    pub async fn enable(name: &str, pool: &PgPool) -> Result<Self> {
        validate_engine_name(name).into_result()?;
        if !Self::can_enable(name, pool).await? {
            let enabled = Self::enabled_names(pool).await?;
            let missing: Vec<&str> = registry::dependencies_for(name)
                .iter()
                .copied()
                .filter(|dep| *dep != registry::CORE_DEPENDENCY && !enabled.contains(*dep))
                .collect();
            return Err(ModelError::Refused(format!(
                "Cannot enable {}: requires {}",
                name,
                missing.join(", ")
            ))
            .into());
        }

        let activation = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO engine_activations (id, engine_name, enabled, configuration)
            VALUES ($1, $2, true, $3)
            ON CONFLICT (engine_name) DO UPDATE SET enabled = true, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(EngineActivationId::new())
        .bind(name)
        .bind(registry::default_config(name))
        .fetch_one(pool)
        .await?;

        tracing::info!(engine = %name, "engine enabled");
        Ok(activation)
    }

    /// Switches the engine off. `None` when the engine was never recorded.
    pub async fn disable(name: &str, pool: &PgPool) -> Result<Option<Self>> {
        let enabled = Self::enabled_names(pool).await?;
        let blocking: Vec<&str> = registry::dependents_of(name)
            .into_iter()
            .filter(|dependent| enabled.contains(*dependent))
            .collect();
        if !blocking.is_empty() {
            return Err(ModelError::Refused(format!(
                "Cannot disable {}: required by {}",
                name,
                blocking.join(", ")
            ))
            .into());
        }

        let activation = sqlx::query_as::<_, Self>(
            "UPDATE engine_activations SET enabled = false, updated_at = NOW() WHERE engine_name = $1 RETURNING *",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;

        if activation.is_some() {
            tracing::info!(engine = %name, "engine disabled");
        }
        Ok(activation)
    }

    pub async fn set_config(&self, key: &str, value: JsonValue, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE engine_activations
            SET configuration = jsonb_set(COALESCE(configuration, '{}'::jsonb), ARRAY[$2]::text[], $3), updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(key)
        .bind(value)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
