use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::validation::BLANK;
use crate::common::{is_blank, ElectionId, ElectionLocationId, ValidationErrors};
use crate::domains::votes::territory::autonomy_name;

use super::election::Election;

pub const DEFAULT_LOCATION: &str = "00";
pub const DEFAULT_LAYOUT: &str = "simple";

/// `(layout key, label)`
pub const LAYOUTS: [(&str, &str); 4] = [
    ("simple", "Listado de respuestas simple"),
    ("accordion", "Listado de respuestas agrupadas"),
    ("pcandidates-election", "Primarias"),
    ("4th-election", "Elección con listas"),
];

/// Layouts rendered by the booth as a full election.
pub const ELECTION_LAYOUTS: [&str; 2] = ["pcandidates-election", "4th-election"];

/// Builds the booth election id by decimal concatenation:
/// `vote_id(100, "01", 2) == Some(100012)`.
///
/// Returns `None` when the concatenation is not a number that fits `i64`.
pub fn vote_id(agora_election_id: i64, location: &str, version: i32) -> Option<i64> {
    format!("{}{}{}", agora_election_id, location, version)
        .parse()
        .ok()
}

/// Interprets form values for the voting info toggle.
pub fn parse_has_voting_info(value: &str) -> bool {
    matches!(value, "true" | "1")
}

/// One territory of an election, with its own booth version and ballot.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ElectionLocation {
    pub id: ElectionLocationId,
    pub election_id: ElectionId,
    pub location: String,
    pub agora_version: i32,
    pub new_agora_version: i32,
    pub override_location: Option<String>,
    pub title: Option<String>,
    pub layout: Option<String>,
    pub description: Option<String>,
    pub share_text: Option<String>,
    pub theme: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ElectionLocation {
    /// Unsaved location with the column defaults.
    pub fn new(election_id: ElectionId) -> Self {
        let now = Utc::now();
        Self {
            id: ElectionLocationId::new(),
            election_id,
            location: DEFAULT_LOCATION.to_string(),
            agora_version: 0,
            new_agora_version: 0,
            override_location: None,
            title: None,
            layout: Some(DEFAULT_LAYOUT.to_string()),
            description: None,
            share_text: None,
            theme: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A location carries voting info once it has a ballot title.
    pub fn has_voting_info(&self) -> bool {
        !is_blank(self.title.as_deref())
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.has_voting_info() {
            errors.require_present("title", self.title.as_deref());
            errors.require_present("layout", self.layout.as_deref());
            errors.require_present("theme", self.theme.as_deref());
        }
        errors
    }

    /// Runs before every save: drops the ballot fields unless voting info is on.
    pub fn prepare_for_save(&mut self, has_voting_info: bool) {
        if !has_voting_info {
            self.clear_voting();
        }
    }

    pub fn clear_voting(&mut self) {
        self.title = None;
        self.layout = None;
        self.description = None;
        self.share_text = None;
        self.theme = None;
    }

    fn effective_location(&self) -> &str {
        self.override_location
            .as_deref()
            .filter(|o| !o.is_empty())
            .unwrap_or(&self.location)
    }

    pub fn vote_id(&self, election: &Election) -> Option<i64> {
        vote_id(
            election.agora_election_id,
            self.effective_location(),
            self.agora_version,
        )
    }

    pub fn new_vote_id(&self, election: &Election) -> Option<i64> {
        vote_id(
            election.agora_election_id,
            self.effective_location(),
            self.new_agora_version,
        )
    }

    pub fn new_version_pending(&self) -> bool {
        self.agora_version != self.new_agora_version
    }

    /// Municipal locations keep the control digit out of the match key.
    pub fn vote_location(&self, election: &Election) -> String {
        if election.scope == 3 {
            self.location.chars().take(5).collect()
        } else {
            self.location.clone()
        }
    }

    pub fn territory(&self, election: &Election) -> String {
        let name = match election.scope {
            0 => return "Estatal".to_string(),
            1 => autonomy_name(&format!("c_{}", self.location))
                .unwrap_or_else(|| election.scope_name())
                .to_string(),
            _ => election.scope_name().to_string(),
        };
        format!("{} ({})", name, self.location)
    }

    /// The layout when it is a full election layout, otherwise `""`.
    pub fn election_layout(&self) -> &str {
        match self.layout.as_deref() {
            Some(layout) if ELECTION_LAYOUTS.contains(&layout) => layout,
            _ => "",
        }
    }

    pub fn link(&self, election: &Election, server_url: &str) -> Option<String> {
        self.vote_id(election)
            .map(|id| format!("{}booth/{}/vote", server_url, id))
    }

    pub fn new_link(&self, election: &Election, server_url: &str) -> Option<String> {
        self.new_vote_id(election)
            .map(|id| format!("{}booth/{}/vote", server_url, id))
    }

    pub fn counter_token(&self, election: &Election, secret: &str) -> String {
        election.generate_access_token(
            secret,
            &format!("{}:{}", self.created_at.timestamp(), self.id),
        )
    }

    pub fn paper_token(&self, election: &Election, secret: &str) -> String {
        election.generate_access_token(secret, &format!("paper:{}", self.id))
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ElectionLocation {
    pub async fn find_by_id(id: ElectionLocationId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM election_locations WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_election(election_id: ElectionId, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM election_locations WHERE election_id = $1 ORDER BY location",
        )
        .bind(election_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Validate and persist, clearing ballot fields when voting info is off
    pub async fn save(mut self, has_voting_info: bool, pool: &PgPool) -> Result<Self> {
        self.prepare_for_save(has_voting_info);
        self.validate().into_result()?;

        let location = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO election_locations (
                id, election_id, location, agora_version, new_agora_version, override_location,
                title, layout, description, share_text, theme
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                location = EXCLUDED.location,
                agora_version = EXCLUDED.agora_version,
                new_agora_version = EXCLUDED.new_agora_version,
                override_location = EXCLUDED.override_location,
                title = EXCLUDED.title,
                layout = EXCLUDED.layout,
                description = EXCLUDED.description,
                share_text = EXCLUDED.share_text,
                theme = EXCLUDED.theme,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.election_id)
        .bind(&self.location)
        .bind(self.agora_version)
        .bind(self.new_agora_version)
        .bind(&self.override_location)
        .bind(&self.title)
        .bind(&self.layout)
        .bind(&self.description)
        .bind(&self.share_text)
        .bind(&self.theme)
        .fetch_one(pool)
        .await?;

        if !has_voting_info {
            sqlx::query("DELETE FROM election_location_questions WHERE election_location_id = $1")
                .bind(location.id)
                .execute(pool)
                .await?;
        }

        Ok(location)
    }

    pub async fn valid_votes_count(&self, election: &Election, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM votes WHERE election_id = $1 AND agora_id = $2 AND deleted_at IS NULL",
        )
        .bind(self.election_id)
        .bind(self.vote_id(election))
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}
