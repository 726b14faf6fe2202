use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;

use crate::common::validation::{BLANK, INVALID, NOT_INCLUDED};
use crate::common::{is_blank, BrandSettingId, OrganizationId, ValidationErrors};
use crate::domains::branding::themes::{contrast_ratio, theme, ThemeColors, HEX_COLOR, MIN_CONTRAST_RATIO};

pub const SCOPE_GLOBAL: &str = "global";
pub const SCOPE_ORGANIZATION: &str = "organization";
pub const SCOPES: [&str; 2] = [SCOPE_GLOBAL, SCOPE_ORGANIZATION];
pub const DEFAULT_THEME: &str = "default";

/// Colour theme applied platform wide or to one organization.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BrandSetting {
    pub id: BrandSettingId,
    pub name: String,
    pub description: Option<String>,
    pub scope: String,
    pub organization_id: Option<OrganizationId>,
    pub theme_id: String,
    pub theme_name: Option<String>,
    pub primary_color: Option<String>,
    pub primary_light_color: Option<String>,
    pub primary_dark_color: Option<String>,
    pub secondary_color: Option<String>,
    pub secondary_light_color: Option<String>,
    pub secondary_dark_color: Option<String>,
    pub active: bool,
    pub version: i32,
    pub metadata: JsonValue,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BrandSetting {
    /// Unsaved global setting with the given name and theme.
    pub fn new(name: impl Into<String>, theme_id: impl Into<String>) -> Self {
        Self {
            id: BrandSettingId::new(),
            name: name.into(),
            description: None,
            scope: SCOPE_GLOBAL.to_string(),
            organization_id: None,
            theme_id: theme_id.into(),
            theme_name: None,
            primary_color: None,
            primary_light_color: None,
            primary_dark_color: None,
            secondary_color: None,
            secondary_light_color: None,
            secondary_dark_color: None,
            active: true,
            version: 1,
            metadata: json!({}),
            created_at: None,
            updated_at: None,
        }
    }

    /// Fallback used when nothing is configured
    pub fn default_setting() -> Self {
        Self::new("Default Theme", DEFAULT_THEME)
    }

    pub fn for_organization(mut self, organization_id: OrganizationId) -> Self {
        self.scope = SCOPE_ORGANIZATION.to_string();
        self.organization_id = Some(organization_id);
        self
    }

    pub fn is_global(&self) -> bool {
        self.scope == SCOPE_GLOBAL
    }

    pub fn is_organization(&self) -> bool {
        self.scope == SCOPE_ORGANIZATION
    }

    fn color_fields(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("primary_color", self.primary_color.as_deref()),
            ("primary_light_color", self.primary_light_color.as_deref()),
            ("primary_dark_color", self.primary_dark_color.as_deref()),
            ("secondary_color", self.secondary_color.as_deref()),
            ("secondary_light_color", self.secondary_light_color.as_deref()),
            ("secondary_dark_color", self.secondary_dark_color.as_deref()),
        ]
    }

    pub fn has_custom_colors(&self) -> bool {
        self.color_fields().iter().any(|(_, c)| !is_blank(*c))
    }

    pub fn colors_differ(&self, other: &BrandSetting) -> bool {
        self.color_fields() != other.color_fields()
    }

    fn custom_colors(&self) -> ThemeColors {
        let present = |c: &Option<String>| c.clone().filter(|c| !c.trim().is_empty());
        ThemeColors {
            primary: present(&self.primary_color),
            primary_light: present(&self.primary_light_color),
            primary_dark: present(&self.primary_dark_color),
            secondary: present(&self.secondary_color),
            secondary_light: present(&self.secondary_light_color),
            secondary_dark: present(&self.secondary_dark_color),
        }
    }

    /// Custom colours when any are set, otherwise the theme's.
    pub fn theme_colors(&self) -> ThemeColors {
        if self.has_custom_colors() {
            self.custom_colors()
        } else {
            theme(&self.theme_id).map(|t| t.colors()).unwrap_or_default()
        }
    }

    pub fn cache_key(&self) -> String {
        let owner = self
            .organization_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| SCOPE_GLOBAL.to_string());
        format!("brand_setting/{}/{}/v{}", self.scope, owner, self.version)
    }

    /// Fills derived values before saving. `previous` is the stored
    /// version of this setting, if any.
    pub fn prepare_for_save(&mut self, previous: Option<&BrandSetting>) {
        if is_blank(self.theme_name.as_deref()) {
            self.theme_name = theme(&self.theme_id).map(|t| t.name.to_string());
        }
        if let Some(previous) = previous {
            if self.colors_differ(previous) {
                self.version = previous.version + 1;
            }
        }
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        errors.require_max_length("name", &self.name, 255);
        if !SCOPES.contains(&self.scope.as_str()) {
            errors.add("scope", NOT_INCLUDED);
        }
        errors.require_present("theme_id", Some(&self.theme_id));
        if self.version <= 0 {
            errors.add("version", "must be greater than 0");
        }

        if self.is_organization() && self.organization_id.is_none() {
            errors.add("organization_id", BLANK);
        }
        if self.is_global() && self.organization_id.is_some() {
            errors.add("organization_id", "must be blank");
        }

        for (field, color) in self.color_fields() {
            if let Some(color) = color.filter(|c| !c.trim().is_empty()) {
                if !HEX_COLOR.is_match(color) {
                    errors.add(field, INVALID);
                }
            }
        }

        if self.has_custom_colors() {
            for (field, color) in [
                ("primary_color", self.primary_color.as_deref()),
                ("secondary_color", self.secondary_color.as_deref()),
            ] {
                let Some(ratio) = color.and_then(|c| contrast_ratio(c, "#ffffff")) else {
                    continue;
                };
                if ratio < MIN_CONTRAST_RATIO {
                    errors.add(
                        field,
                        format!(
                            "has insufficient contrast ({:.2}:1). WCAG AA requires ≥ 4.5:1.",
                            ratio
                        ),
                    );
                }
            }
        }
        errors
    }

    /// Shape consumed by the web client.
    pub fn to_brand_json(&self) -> JsonValue {
        let theme = theme(&self.theme_id);
        json!({
            "theme": {
                "id": self.theme_id,
                "name": self.theme_name.clone().or_else(|| theme.map(|t| t.name.to_string())),
                "description": theme.map(|t| t.description),
                "colors": self.theme_colors(),
            },
            "scope": self.scope,
            "organizationId": self.organization_id,
            "active": self.active,
            "version": self.version,
            "customColors": self.has_custom_colors().then(|| self.custom_colors()),
            "metadata": self.metadata,
            "createdAt": self.created_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "updatedAt": self.updated_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl BrandSetting {
    pub async fn find_by_id(id: BrandSettingId, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM brand_settings WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Active setting of the organization, else the first active global
    /// one, else the built in default
    pub async fn current_for_organization(
        organization_id: Option<OrganizationId>,
        pool: &PgPool,
    ) -> Result<Self> {
        if let Some(organization_id) = organization_id {
            let setting = sqlx::query_as::<_, Self>(
                r#"
                SELECT * FROM brand_settings
                WHERE active AND scope = 'organization' AND organization_id = $1
                ORDER BY created_at LIMIT 1
                "#,
            )
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;
            if let Some(setting) = setting {
                return Ok(setting);
            }
        }

        let global = sqlx::query_as::<_, Self>(
            "SELECT * FROM brand_settings WHERE active AND scope = 'global' ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;
        Ok(global.unwrap_or_else(Self::default_setting))
    }

    async fn check_uniqueness(&self, errors: &mut ValidationErrors, pool: &PgPool) -> Result<()> {
        if self.is_organization() {
            if let Some(organization_id) = self.organization_id {
                let existing: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS(
                        SELECT 1 FROM brand_settings
                        WHERE scope = 'organization' AND organization_id = $1 AND id <> $2
                    )
                    "#,
                )
                .bind(organization_id)
                .bind(self.id)
                .fetch_one(pool)
                .await?;
                if existing {
                    errors.add(
                        "organization_id",
                        "already has a brand setting. Only one per organization allowed.",
                    );
                }
            }
        }

        if self.is_global() && !self.active {
            let other_active: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM brand_settings WHERE scope = 'global' AND active AND id <> $1)",
            )
            .bind(self.id)
            .fetch_one(pool)
            .await?;
            if !other_active {
                errors.add(
                    "active",
                    "cannot be disabled. At least one global brand setting must be active.",
                );
            }
        }
        Ok(())
    }

    /// Validates and inserts or updates the setting.
    pub async fn save(mut self, pool: &PgPool) -> Result<Self> {
        let previous = Self::find_by_id(self.id, pool).await?;
        self.prepare_for_save(previous.as_ref());

        let mut errors = self.validate();
        self.check_uniqueness(&mut errors, pool).await?;
        errors.into_result()?;

        let saved = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO brand_settings (
                id, name, description, scope, organization_id, theme_id, theme_name,
                primary_color, primary_light_color, primary_dark_color,
                secondary_color, secondary_light_color, secondary_dark_color,
                active, version, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                scope = EXCLUDED.scope,
                organization_id = EXCLUDED.organization_id,
                theme_id = EXCLUDED.theme_id,
                theme_name = EXCLUDED.theme_name,
                primary_color = EXCLUDED.primary_color,
                primary_light_color = EXCLUDED.primary_light_color,
                primary_dark_color = EXCLUDED.primary_dark_color,
                secondary_color = EXCLUDED.secondary_color,
                secondary_light_color = EXCLUDED.secondary_light_color,
                secondary_dark_color = EXCLUDED.secondary_dark_color,
                active = EXCLUDED.active,
                version = EXCLUDED.version,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.description)
        .bind(&self.scope)
        .bind(self.organization_id)
        .bind(&self.theme_id)
        .bind(&self.theme_name)
        .bind(&self.primary_color)
        .bind(&self.primary_light_color)
        .bind(&self.primary_dark_color)
        .bind(&self.secondary_color)
        .bind(&self.secondary_light_color)
        .bind(&self.secondary_dark_color)
        .bind(self.active)
        .bind(self.version)
        .bind(&self.metadata)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            brand_setting_id = %saved.id,
            cache_key = %saved.cache_key(),
            "brand setting saved"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theme_name_comes_from_predefined_theme() {
        let mut setting = BrandSetting::new("Marca", "forest");
        setting.prepare_for_save(None);
        assert_eq!(setting.theme_name.as_deref(), Some("Forest Green"));
        assert_eq!(setting.version, 1);
    }

    #[test]
    fn version_bumps_only_when_colours_change() {
        let mut stored = BrandSetting::new("Marca", "default");
        stored.version = 3;

        let mut same = stored.clone();
        same.name = "Otra".to_string();
        same.prepare_for_save(Some(&stored));
        assert_eq!(same.version, 3);

        let mut recoloured = stored.clone();
        recoloured.primary_color = Some("#1e40af".to_string());
        recoloured.prepare_for_save(Some(&stored));
        assert_eq!(recoloured.version, 4);
    }

    #[test]
    fn scope_rules() {
        let mut setting = BrandSetting::new("Marca", "default");
        setting.scope = SCOPE_ORGANIZATION.to_string();
        assert!(setting.validate().includes("organization_id", BLANK));

        let setting = BrandSetting::new("Marca", "default").for_organization(OrganizationId::new());
        assert!(setting.validate().is_empty());

        let mut setting = BrandSetting::new("Marca", "default");
        setting.organization_id = Some(OrganizationId::new());
        assert!(setting.validate().includes("organization_id", "must be blank"));

        let mut setting = BrandSetting::new("Marca", "default");
        setting.scope = "planet".to_string();
        setting.version = 0;
        let errors = setting.validate();
        assert!(errors.includes("scope", NOT_INCLUDED));
        assert!(!errors.get("version").is_empty());
    }

    #[test]
    fn colours_must_be_hex_and_readable() {
        let mut setting = BrandSetting::new("Marca", "default");
        setting.primary_light_color = Some("purple".to_string());
        setting.primary_color = Some("#777777".to_string());
        setting.secondary_color = Some("#000".to_string());
        let errors = setting.validate();
        assert!(errors.includes("primary_light_color", INVALID));
        assert!(errors.includes(
            "primary_color",
            "has insufficient contrast (4.48:1). WCAG AA requires ≥ 4.5:1."
        ));
        assert!(errors.get("secondary_color").is_empty());

        setting.primary_color = Some("#767676".to_string());
        setting.primary_light_color = None;
        assert!(setting.validate().is_empty());
    }

    #[test]
    fn colours_fall_back_to_theme() {
        let mut setting = BrandSetting::new("Marca", "ocean");
        assert!(!setting.has_custom_colors());
        assert_eq!(setting.theme_colors().primary.as_deref(), Some("#1e40af"));

        setting.primary_color = Some("#15803d".to_string());
        let colors = setting.theme_colors();
        assert_eq!(colors.primary.as_deref(), Some("#15803d"));
        assert!(colors.secondary.is_none());
    }

    #[test]
    fn cache_key_names_scope_owner_and_version() {
        let setting = BrandSetting::new("Marca", "default");
        assert_eq!(setting.cache_key(), "brand_setting/global/global/v1");

        let org = OrganizationId::new();
        let setting = BrandSetting::new("Marca", "default").for_organization(org);
        assert_eq!(setting.cache_key(), format!("brand_setting/organization/{}/v1", org));
    }

    #[test]
    fn brand_json_uses_camel_case() {
        let mut setting = BrandSetting::new("Marca", "default");
        setting.secondary_dark_color = Some("#333333".to_string());
        let json = setting.to_brand_json();
        assert_eq!(json["theme"]["id"], "default");
        assert_eq!(json["theme"]["name"], "PlebisHub Default");
        assert_eq!(json["theme"]["colors"]["secondaryDark"], "#333333");
        assert_eq!(json["customColors"]["secondaryDark"], "#333333");
        assert!(json["organizationId"].is_null());
        assert_eq!(json["version"], 1);

        let plain = BrandSetting::default_setting().to_brand_json();
        assert!(plain["customColors"].is_null());
        assert_eq!(plain["theme"]["colors"]["primaryLight"], "#8a4f98");
    }
}
