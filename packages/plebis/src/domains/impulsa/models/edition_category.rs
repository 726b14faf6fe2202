use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use typed_builder::TypedBuilder;

use crate::common::{ImpulsaEditionCategoryId, ImpulsaEditionId, ValidationErrors};
use crate::domains::impulsa::forms::Form;

pub const FLAG_HAS_VOTINGS: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Internal,
    State,
    Territorial,
}

impl CategoryType {
    pub fn code(self) -> i32 {
        match self {
            Self::Internal => 0,
            Self::State => 1,
            Self::Territorial => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Internal),
            1 => Some(Self::State),
            2 => Some(Self::Territorial),
            _ => None,
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::State => write!(f, "state"),
            Self::Territorial => write!(f, "territorial"),
        }
    }
}

impl FromStr for CategoryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "state" => Ok(Self::State),
            "territorial" => Ok(Self::Territorial),
            _ => Err(anyhow::anyhow!("Invalid category type: {}", s)),
        }
    }
}

/// Prize category of an edition. Holds the wizard and evaluation forms its
/// projects are filled in and judged with.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImpulsaEditionCategory {
    pub id: ImpulsaEditionCategoryId,
    pub impulsa_edition_id: ImpulsaEditionId,
    pub name: String,
    pub category_type: i32,
    pub winners: i32,
    pub prize: i32,
    /// Pipe separated territory codes
    pub territories: Option<String>,
    pub only_authors: bool,
    pub coofficial_language: Option<String>,
    pub wizard: JsonValue,
    pub evaluation: JsonValue,
    pub flags: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewImpulsaEditionCategory {
    pub impulsa_edition_id: ImpulsaEditionId,
    pub name: String,
    #[builder(default)]
    pub category_type: Option<CategoryType>,
    #[builder(default)]
    pub winners: Option<i32>,
    #[builder(default)]
    pub prize: Option<i32>,
    #[builder(default)]
    pub territories: Vec<String>,
    #[builder(default)]
    pub only_authors: bool,
    #[builder(default)]
    pub coofficial_language: Option<String>,
    #[builder(default)]
    pub wizard: Form,
    #[builder(default)]
    pub evaluation: Form,
}

impl NewImpulsaEditionCategory {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        errors.require_some("category_type", self.category_type.as_ref());
        errors.require_some("winners", self.winners.as_ref());
        errors.require_some("prize", self.prize.as_ref());
        errors
    }
}

/// `|`-joined codes without blanks.
pub fn join_territories<S: AsRef<str>>(territories: &[S]) -> String {
    territories
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("|")
}

impl ImpulsaEditionCategory {
    pub fn category_type(&self) -> Option<CategoryType> {
        CategoryType::from_code(self.category_type)
    }

    pub fn has_territory(&self) -> bool {
        self.category_type() == Some(CategoryType::Territorial)
    }

    pub fn translatable(&self) -> bool {
        self.coofficial_language
            .as_deref()
            .is_some_and(|l| !l.trim().is_empty())
    }

    pub fn territories(&self) -> Vec<String> {
        self.territories
            .as_deref()
            .map(|t| {
                t.split('|')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Projects going through to the final vote
    pub fn prewinners(&self) -> i32 {
        self.winners * 2
    }

    pub fn has_votings(&self) -> bool {
        self.flags & FLAG_HAS_VOTINGS != 0
    }

    pub fn wizard_form(&self) -> Result<Form> {
        Form::from_json(&self.wizard)
    }

    pub fn evaluation_form(&self) -> Result<Form> {
        Form::from_json(&self.evaluation)
    }

    /// Wizard definition as YAML, for editing by admins
    pub fn wizard_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.wizard_form()?).context("Failed to serialize wizard")
    }

    pub fn evaluation_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.evaluation_form()?).context("Failed to serialize evaluation")
    }
}

/// Form from its YAML representation
pub fn form_from_yaml(yaml: &str) -> Result<Form> {
    serde_yaml::from_str(yaml).context("Invalid form YAML")
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ImpulsaEditionCategory {
    pub async fn find_by_id(id: ImpulsaEditionCategoryId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM impulsa_edition_categories WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_for_edition(edition_id: ImpulsaEditionId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_edition_categories WHERE impulsa_edition_id = $1 ORDER BY name",
        )
        .bind(edition_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Categories of one type, excluding author-only ones
    pub async fn find_by_type(
        edition_id: ImpulsaEditionId,
        category_type: CategoryType,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM impulsa_edition_categories
            WHERE impulsa_edition_id = $1 AND category_type = $2 AND NOT only_authors
            ORDER BY name
            "#,
        )
        .bind(edition_id)
        .bind(category_type.code())
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn create(new: &NewImpulsaEditionCategory, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO impulsa_edition_categories (
                id, impulsa_edition_id, name, category_type, winners, prize,
                territories, only_authors, coofficial_language, wizard, evaluation
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(ImpulsaEditionCategoryId::new())
        .bind(new.impulsa_edition_id)
        .bind(&new.name)
        .bind(new.category_type.map(CategoryType::code))
        .bind(new.winners)
        .bind(new.prize)
        .bind(join_territories(&new.territories))
        .bind(new.only_authors)
        .bind(&new.coofficial_language)
        .bind(serde_json::to_value(&new.wizard)?)
        .bind(serde_json::to_value(&new.evaluation)?)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn set_has_votings(&self, enabled: bool, pool: &PgPool) -> Result<Self> {
        let flags = if enabled {
            self.flags | FLAG_HAS_VOTINGS
        } else {
            self.flags & !FLAG_HAS_VOTINGS
        };
        sqlx::query_as::<_, Self>(
            "UPDATE impulsa_edition_categories SET flags = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(flags)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::impulsa::models::test_support::category;
    use serde_json::json;

    #[test]
    fn required_attributes() {
        let new = NewImpulsaEditionCategory::builder()
            .impulsa_edition_id(ImpulsaEditionId::new())
            .name("")
            .prize(Some(1000))
            .build();
        let errors = new.validate();
        for field in ["name", "category_type", "winners"] {
            assert!(!errors.get(field).is_empty(), "{}", field);
        }
        assert!(errors.get("prize").is_empty());
    }

    #[test]
    fn territories_are_pipe_separated() {
        assert_eq!(join_territories(&["a_01", "", " a_02 ", "a_03"]), "a_01|a_02|a_03");

        let mut c = category(json!(null), json!(null));
        assert!(c.territories().is_empty());
        c.territories = Some("a_01|a_02|a_03".to_string());
        assert_eq!(c.territories(), vec!["a_01", "a_02", "a_03"]);
    }

    #[test]
    fn type_flags_and_prewinners() {
        let mut c = category(json!(null), json!(null));
        c.winners = 5;
        assert_eq!(c.prewinners(), 10);
        assert!(!c.has_territory());
        c.category_type = CategoryType::Territorial.code();
        assert!(c.has_territory());

        assert!(!c.has_votings());
        c.flags = FLAG_HAS_VOTINGS;
        assert!(c.has_votings());

        assert!(!c.translatable());
        c.coofficial_language = Some("ca".to_string());
        assert!(c.translatable());
    }

    #[test]
    fn forms_round_trip_through_yaml() {
        let c = category(
            json!({"steps": [{"name": "s1", "groups": [{"name": "g", "fields": [{"name": "f"}]}]}]}),
            json!(null),
        );
        let yaml = c.wizard_yaml().unwrap();
        assert!(yaml.contains("name: s1"));
        assert_eq!(form_from_yaml(&yaml).unwrap(), c.wizard_form().unwrap());
        assert!(c.evaluation_form().unwrap().steps.is_empty());
    }
}
