use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::fmt;
use typed_builder::TypedBuilder;

use crate::common::utils::{email_error, is_web_url};
use crate::common::validation::INVALID;
use crate::common::{ImpulsaEditionId, ValidationErrors};

pub const SPREADSHEET_CONTENT_TYPES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/msexcel",
    "application/x-msexcel",
    "application/x-ms-excel",
    "application/x-excel",
    "application/x-dos_ms_excel",
    "application/xls",
    "application/x-xls",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
];

pub const DOCUMENT_CONTENT_TYPES: &[&str] = &[
    "application/vnd.ms-word",
    "application/msword",
    "application/x-msword",
    "application/x-ms-word",
    "application/x-word",
    "application/x-dos_ms_word",
    "application/doc",
    "application/x-doc",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
];

/// Where an edition is in its calendar. Codes are stored and exported, so
/// `PublishResults` keeps code 7 even though it comes before `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionPhase {
    NotStarted,
    NewProjects,
    ReviewProjects,
    ValidationProjects,
    Prevotings,
    Votings,
    Ended,
    PublishResults,
}

impl EditionPhase {
    pub fn code(self) -> i32 {
        match self {
            Self::NotStarted => 0,
            Self::NewProjects => 1,
            Self::ReviewProjects => 2,
            Self::ValidationProjects => 3,
            Self::Prevotings => 4,
            Self::Votings => 5,
            Self::Ended => 6,
            Self::PublishResults => 7,
        }
    }

    pub fn allow_creation(self) -> bool {
        self == Self::NewProjects
    }

    pub fn allow_edition(self) -> bool {
        self.code() < Self::ReviewProjects.code()
    }

    pub fn allow_fixes(self) -> bool {
        self.code() < Self::ValidationProjects.code()
    }

    pub fn allow_validation(self) -> bool {
        self == Self::ValidationProjects
    }

    pub fn show_projects(self) -> bool {
        self.code() > Self::ValidationProjects.code()
    }

    pub fn publish_results(self) -> bool {
        self.code() < Self::PublishResults.code()
    }

    pub fn active(self) -> bool {
        self != Self::Ended
    }
}

impl fmt::Display for EditionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::NewProjects => "new_projects",
            Self::ReviewProjects => "review_projects",
            Self::ValidationProjects => "validation_projects",
            Self::Prevotings => "prevotings",
            Self::Votings => "votings",
            Self::Ended => "ended",
            Self::PublishResults => "publish_results",
        };
        write!(f, "{}", name)
    }
}

/// Yearly call for projects.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImpulsaEdition {
    pub id: ImpulsaEditionId,
    pub name: String,
    pub email: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub new_projects_until: DateTime<Utc>,
    pub review_projects_until: DateTime<Utc>,
    pub validation_projects_until: DateTime<Utc>,
    pub votings_start_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub publish_results_at: Option<DateTime<Utc>>,
    /// Locale → legal conditions URL
    pub legal: JsonValue,
    pub schedule_model_content_type: Option<String>,
    pub activities_resources_model_content_type: Option<String>,
    pub requested_budget_model_content_type: Option<String>,
    pub monitoring_evaluation_model_content_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewImpulsaEdition {
    pub name: String,
    pub email: String,
    #[builder(default)]
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub new_projects_until: DateTime<Utc>,
    pub review_projects_until: DateTime<Utc>,
    pub validation_projects_until: DateTime<Utc>,
    pub votings_start_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[builder(default)]
    pub publish_results_at: Option<DateTime<Utc>>,
    #[builder(default = JsonValue::Object(Default::default()))]
    pub legal: JsonValue,
    #[builder(default)]
    pub schedule_model_content_type: Option<String>,
    #[builder(default)]
    pub activities_resources_model_content_type: Option<String>,
    #[builder(default)]
    pub requested_budget_model_content_type: Option<String>,
    #[builder(default)]
    pub monitoring_evaluation_model_content_type: Option<String>,
}

fn check_spreadsheet(errors: &mut ValidationErrors, field: &str, content_type: Option<&str>) {
    if let Some(ct) = content_type {
        if !SPREADSHEET_CONTENT_TYPES.contains(&ct) {
            errors.add(field, "debe ser un archivo de hoja de cálculo (Excel, ODS)");
        }
    }
}

fn check_document(errors: &mut ValidationErrors, field: &str, content_type: Option<&str>) {
    if let Some(ct) = content_type {
        if !DOCUMENT_CONTENT_TYPES.contains(&ct) {
            errors.add(field, "debe ser un documento (Word, ODT)");
        }
    }
}

impl NewImpulsaEdition {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        errors.require_present("email", Some(&self.email));
        if let Some(message) = email_error(&self.email) {
            errors.add("email", message);
        }

        if let Some(legal) = self.legal.as_object() {
            for (locale, link) in legal {
                let link = link.as_str().unwrap_or_default();
                if !link.trim().is_empty() && !is_web_url(link) {
                    let locale = locale.trim_start_matches("legal_");
                    errors.add(&format!("legal_{}", locale), INVALID);
                }
            }
        }

        check_spreadsheet(&mut errors, "schedule_model", self.schedule_model_content_type.as_deref());
        check_document(
            &mut errors,
            "activities_resources_model",
            self.activities_resources_model_content_type.as_deref(),
        );
        check_spreadsheet(
            &mut errors,
            "requested_budget_model",
            self.requested_budget_model_content_type.as_deref(),
        );
        check_spreadsheet(
            &mut errors,
            "monitoring_evaluation_model",
            self.monitoring_evaluation_model_content_type.as_deref(),
        );
        errors
    }
}

impl ImpulsaEdition {
    pub fn current_phase(&self, now: DateTime<Utc>) -> EditionPhase {
        if now < self.start_at {
            EditionPhase::NotStarted
        } else if now < self.new_projects_until {
            EditionPhase::NewProjects
        } else if now < self.review_projects_until {
            EditionPhase::ReviewProjects
        } else if now < self.validation_projects_until {
            EditionPhase::ValidationProjects
        } else if now < self.votings_start_at {
            EditionPhase::Prevotings
        } else if now < self.ends_at {
            EditionPhase::Votings
        } else if self.publish_results_at.is_some_and(|at| now < at) {
            EditionPhase::PublishResults
        } else {
            EditionPhase::Ended
        }
    }

    pub fn allow_creation(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).allow_creation()
    }

    pub fn allow_edition(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).allow_edition()
    }

    pub fn allow_fixes(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).allow_fixes()
    }

    pub fn allow_validation(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).allow_validation()
    }

    pub fn show_projects(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).show_projects()
    }

    pub fn publish_results(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).publish_results()
    }

    pub fn active(&self, now: DateTime<Utc>) -> bool {
        self.current_phase(now).active()
    }

    /// Legal conditions link for `locale`, falling back to `default_locale`
    pub fn legal_link(&self, locale: &str, default_locale: &str) -> Option<&str> {
        let lookup = |l: &str| {
            self.legal
                .get(format!("legal_{}", l))
                .or_else(|| self.legal.get(l))
                .and_then(JsonValue::as_str)
        };
        lookup(locale).or_else(|| lookup(default_locale))
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ImpulsaEdition {
    pub async fn find_by_id(id: ImpulsaEditionId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM impulsa_editions WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn create(new: &NewImpulsaEdition, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        let edition = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO impulsa_editions (
                id, name, email, description, start_at, new_projects_until,
                review_projects_until, validation_projects_until, votings_start_at,
                ends_at, publish_results_at, legal, schedule_model_content_type,
                activities_resources_model_content_type, requested_budget_model_content_type,
                monitoring_evaluation_model_content_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(ImpulsaEditionId::new())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.description)
        .bind(new.start_at)
        .bind(new.new_projects_until)
        .bind(new.review_projects_until)
        .bind(new.validation_projects_until)
        .bind(new.votings_start_at)
        .bind(new.ends_at)
        .bind(new.publish_results_at)
        .bind(&new.legal)
        .bind(&new.schedule_model_content_type)
        .bind(&new.activities_resources_model_content_type)
        .bind(&new.requested_budget_model_content_type)
        .bind(&new.monitoring_evaluation_model_content_type)
        .fetch_one(pool)
        .await?;

        tracing::info!(edition_id = %edition.id, name = %edition.name, "impulsa edition created");
        Ok(edition)
    }

    /// Editions running at `now`, earliest first
    pub async fn find_active(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_editions WHERE start_at < $1 AND ends_at > $1 ORDER BY start_at ASC",
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_upcoming(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_editions WHERE start_at > $1 ORDER BY start_at ASC",
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_previous(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_editions WHERE ends_at <= $1 ORDER BY start_at DESC",
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// First active edition, otherwise the latest finished one
    pub async fn find_current(now: DateTime<Utc>, pool: &PgPool) -> Result<Option<Self>> {
        if let Some(edition) = Self::find_active(now, pool).await?.into_iter().next() {
            return Ok(Some(edition));
        }
        Ok(Self::find_previous(now, pool).await?.into_iter().next())
    }
}
