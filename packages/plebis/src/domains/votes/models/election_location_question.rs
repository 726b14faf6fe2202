use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::validation::{BLANK, NOT_INCLUDED};
use crate::common::{ElectionLocationId, ElectionLocationQuestionId, ValidationErrors};

use super::election_location::{ElectionLocation, ELECTION_LAYOUTS};

/// `(key, label)`
pub const VOTING_SYSTEMS: [(&str, &str); 3] = [
    ("plurality-at-large", "Elige opciones"),
    ("pairwise-beta", "Comparación por pares (beta)"),
    ("pairwise-bradleyterry", "Comparación por pares (Bradley-Terry)"),
];

pub const TOTALS: [(&str, &str); 1] = [("over-total-valid-votes", "Sobre votos válidos")];

pub const DEFAULT_HEADERS: [&str; 1] = ["Texto"];

/// A question on the ballot of one election location.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ElectionLocationQuestion {
    pub id: ElectionLocationQuestionId,
    pub election_location_id: ElectionLocationId,
    pub title: String,
    pub description: Option<String>,
    pub voting_system: String,
    pub layout: Option<String>,
    pub winners: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub random_order: bool,
    pub totals: String,
    pub options: String,
    pub options_headers: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalise the options text: trimmed lines, blank lines removed.
pub fn format_options(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ElectionLocationQuestion {
    pub fn new(election_location_id: ElectionLocationId, title: &str, options: &str) -> Self {
        let now = Utc::now();
        Self {
            id: ElectionLocationQuestionId::new(),
            election_location_id,
            title: title.to_string(),
            description: None,
            voting_system: "plurality-at-large".to_string(),
            layout: None,
            winners: 1,
            minimum: 0,
            maximum: 1,
            random_order: true,
            totals: "over-total-valid-votes".to_string(),
            options: format_options(options),
            options_headers: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(&self.title));
        errors.require_present("voting_system", Some(&self.voting_system));
        if !self.voting_system.is_empty()
            && !VOTING_SYSTEMS.iter().any(|(k, _)| *k == self.voting_system)
        {
            errors.add("voting_system", NOT_INCLUDED);
        }
        errors.require_present("totals", Some(&self.totals));
        errors.require_present("options", Some(&self.options));
        if self.winners < 1 {
            errors.add("winners", "must be greater than or equal to 1");
        }
        errors.require_non_negative("minimum", Some(self.minimum.into()));
        if self.maximum < self.minimum {
            errors.add("maximum", "must be greater than or equal to minimum");
        }
        errors
    }

    pub fn set_options(&mut self, text: &str) {
        self.options = format_options(text);
    }

    /// One entry per option line, columns split on tabs.
    pub fn options_list(&self) -> Vec<Vec<String>> {
        self.options
            .lines()
            .map(|line| line.split('\t').map(|c| c.trim().to_string()).collect())
            .collect()
    }

    pub fn options_headers(&self) -> Vec<String> {
        match self.options_headers.as_deref() {
            Some(headers) if !headers.is_empty() => {
                headers.split('\t').map(str::to_string).collect()
            }
            _ => DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    /// Stores non-blank headers tab separated. All-blank input keeps the
    /// current value; `None` clears it.
    pub fn set_options_headers(&mut self, headers: Option<&[Option<&str>]>) {
        let Some(headers) = headers else {
            self.options_headers = None;
            return;
        };
        let kept: Vec<&str> = headers
            .iter()
            .flatten()
            .copied()
            .filter(|h| !h.trim().is_empty())
            .collect();
        if !kept.is_empty() {
            self.options_headers = Some(kept.join("\t"));
        }
    }

    /// Booth layout for this question.
    pub fn layout(&self, location: &ElectionLocation) -> String {
        if self.voting_system == "pairwise-beta" {
            return "simple".to_string();
        }
        match location.layout.as_deref() {
            Some(layout) if ELECTION_LAYOUTS.contains(&layout) => String::new(),
            Some(layout) => layout.to_string(),
            None => String::new(),
        }
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ElectionLocationQuestion {
    pub async fn find_by_location(
        election_location_id: ElectionLocationId,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM election_location_questions WHERE election_location_id = $1 ORDER BY created_at",
        )
        .bind(election_location_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        self.validate().into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO election_location_questions (
                id, election_location_id, title, description, voting_system, layout, winners,
                minimum, maximum, random_order, totals, options, options_headers
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.election_location_id)
        .bind(&self.title)
        .bind(&self.description)
        .bind(&self.voting_system)
        .bind(&self.layout)
        .bind(self.winners)
        .bind(self.minimum)
        .bind(self.maximum)
        .bind(self.random_order)
        .bind(&self.totals)
        .bind(&self.options)
        .bind(&self.options_headers)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
