use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use typed_builder::TypedBuilder;

use crate::common::utils::{access_token, random_key};
use crate::common::validation::NOT_INCLUDED;
use crate::common::{ElectionId, ValidationErrors};
use crate::config::Config;
use crate::domains::users::User;

use super::election_location::ElectionLocation;
use super::vote_circle::VoteCircle;

/// Territorial scope names, indexed by the `scope` column.
pub const SCOPES: [&str; 7] = [
    "Estatal",
    "Comunidad",
    "Provincial",
    "Municipal",
    "Insular",
    "Extranjeros",
    "Círculos",
];

pub const CENSUS_CONTENT_TYPES: [&str; 3] = ["text/csv", "text/plain", "application/csv"];
pub const CENSUS_MAX_BYTES: i64 = 10 * 1024 * 1024;

/// Flag bits stored in `elections.flags`.
pub mod flags {
    pub const REQUIRES_SMS_CHECK: i32 = 1;
    pub const SHOW_ON_INDEX: i32 = 2;
    pub const IGNORE_MULTIPLE_TERRITORIES: i32 = 4;
    pub const REQUIRES_VATID_CHECK: i32 = 8;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElectionType {
    Nvotes,
    External,
    Paper,
}

impl ElectionType {
    pub fn code(self) -> i32 {
        match self {
            Self::Nvotes => 0,
            Self::External => 1,
            Self::Paper => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Nvotes),
            1 => Some(Self::External),
            2 => Some(Self::Paper),
            _ => None,
        }
    }
}

impl fmt::Display for ElectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvotes => write!(f, "nvotes"),
            Self::External => write!(f, "external"),
            Self::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for ElectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nvotes" => Ok(Self::Nvotes),
            "external" => Ok(Self::External),
            "paper" => Ok(Self::Paper),
            _ => Err(anyhow::anyhow!("Invalid election type: {}", s)),
        }
    }
}

/// An election run on an external voting booth.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Election {
    pub id: ElectionId,
    pub title: String,
    pub info_url: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub agora_election_id: i64,
    pub scope: i32,
    pub election_type: i32,
    pub flags: i32,
    pub server: Option<String>,
    pub counter_key: Option<String>,
    pub voter_id_template: Option<String>,
    pub user_created_at_max: Option<DateTime<Utc>>,
    pub census_file_name: Option<String>,
    pub census_content_type: Option<String>,
    pub census_byte_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Census file metadata attached to an election.
#[derive(Debug, Clone)]
pub struct CensusFile {
    pub file_name: String,
    pub content_type: String,
    pub byte_size: i64,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewElection {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub agora_election_id: i64,
    #[builder(default = 0)]
    pub scope: i32,
    #[builder(default = ElectionType::Nvotes)]
    pub election_type: ElectionType,
    #[builder(default = 0)]
    pub flags: i32,
    #[builder(default)]
    pub info_url: Option<String>,
    #[builder(default)]
    pub server: Option<String>,
    #[builder(default)]
    pub counter_key: Option<String>,
    #[builder(default)]
    pub voter_id_template: Option<String>,
    #[builder(default)]
    pub user_created_at_max: Option<DateTime<Utc>>,
    #[builder(default)]
    pub census_file: Option<CensusFile>,
}

impl NewElection {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(&self.title));
        if !(0..SCOPES.len() as i32).contains(&self.scope) {
            errors.add("scope", NOT_INCLUDED);
        }
        if let Some(census) = &self.census_file {
            validate_census_file(census, &mut errors);
        }
        errors
    }
}

fn validate_census_file(census: &CensusFile, errors: &mut ValidationErrors) {
    if !CENSUS_CONTENT_TYPES.contains(&census.content_type.as_str()) {
        errors.add("census_file", "No reconocido como CSV");
    }
    if census.byte_size >= CENSUS_MAX_BYTES {
        errors.add("census_file", "debe ser menor de 10MB");
    }
}

/// One line of the `locations` text: `location,version[,override]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationLine {
    pub location: String,
    pub agora_version: i32,
    pub override_location: Option<String>,
}

/// Parse the `locations` text, skipping blank lines.
pub fn parse_locations(text: &str) -> Vec<LocationLine> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let location = parts.next().unwrap_or_default().to_string();
            let agora_version = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            let override_location = parts
                .next()
                .filter(|o| !o.is_empty())
                .map(str::to_string);
            LocationLine {
                location,
                agora_version,
                override_location,
            }
        })
        .collect()
}

impl Election {
    pub fn has_flag(&self, flag: i32) -> bool {
        self.flags & flag != 0
    }

    pub fn election_type(&self) -> Option<ElectionType> {
        ElectionType::from_code(self.election_type)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at < now && now < self.ends_at
    }

    /// Starts within the next 12 hours.
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.starts_at > now && self.starts_at < now + Duration::hours(12)
    }

    /// Ended within the last 7 days.
    pub fn recently_finished(&self, now: DateTime<Utc>) -> bool {
        self.ends_at < now && self.ends_at > now - Duration::days(7)
    }

    pub fn scope_name(&self) -> &'static str {
        usize::try_from(self.scope)
            .ok()
            .and_then(|i| SCOPES.get(i))
            .copied()
            .unwrap_or("")
    }

    pub fn multiple_territories(&self) -> bool {
        matches!(self.scope, 1..=4 | 6) && !self.has_flag(flags::IGNORE_MULTIPLE_TERRITORIES)
    }

    /// Whole hours between start and end.
    pub fn duration(&self) -> i64 {
        (self.ends_at - self.starts_at).num_hours()
    }

    pub fn generate_access_token(&self, secret: &str, info: &str) -> String {
        access_token(secret, self.counter_key.as_deref().unwrap_or(""), info)
    }

    pub fn counter_token(&self, secret: &str) -> String {
        self.generate_access_token(secret, &self.created_at.timestamp().to_string())
    }

    pub fn server_url<'a>(&self, config: &'a Config) -> Option<&'a str> {
        config
            .voting_server(self.server.as_deref())
            .map(|s| s.url.as_str())
    }

    pub fn server_shared_key<'a>(&self, config: &'a Config) -> Option<&'a str> {
        config
            .voting_server(self.server.as_deref())
            .map(|s| s.shared_key.as_str())
    }

    /// Whether a user can take part at all given the scope.
    pub fn has_location_for(&self, user: &User) -> bool {
        match self.scope {
            5 => user.country != "ES",
            _ => true,
        }
    }

    /// Users created after the census cut-off are excluded.
    pub fn has_valid_user_created_at(&self, user: &User) -> bool {
        self.user_created_at_max
            .map_or(true, |max| user.created_at < max)
    }

    /// Election location code the user votes in, for this scope.
    pub fn user_location_code(&self, user: &User, circle: Option<&VoteCircle>) -> Option<String> {
        let code = match self.scope {
            0 => "00".to_string(),
            1 => user.vote_autonomy_numeric(),
            2 => user.vote_province_numeric(),
            3 => user.vote_town_numeric(),
            4 => user.vote_island_numeric(),
            5 if user.country != "ES" => "00".to_string(),
            6 => circle?.location_number.to_string(),
            _ => return None,
        };
        Some(code).filter(|c| !c.is_empty() && c != "-")
    }

    fn location_for<'a>(
        &self,
        user: &User,
        circle: Option<&VoteCircle>,
        locations: &'a [ElectionLocation],
    ) -> Option<&'a ElectionLocation> {
        if matches!(self.scope, 0 | 5) {
            return locations.first();
        }
        let code = self.user_location_code(user, circle)?;
        let code = if self.scope == 3 { &code[..code.len().min(5)] } else { &code[..] };
        locations.iter().find(|l| l.vote_location(self) == code)
    }

    pub fn has_valid_location_for(
        &self,
        user: &User,
        circle: Option<&VoteCircle>,
        locations: &[ElectionLocation],
    ) -> bool {
        self.has_location_for(user)
            && self.has_valid_user_created_at(user)
            && self.location_for(user, circle, locations).is_some()
    }

    /// Booth election id for the user's location.
    pub fn scoped_agora_election_id(
        &self,
        user: &User,
        circle: Option<&VoteCircle>,
        locations: &[ElectionLocation],
    ) -> Option<i64> {
        self.location_for(user, circle, locations)
            .and_then(|l| l.vote_id(self))
    }

    /// Title with the user's territory appended for territorial elections.
    pub fn full_title_for(
        &self,
        user: &User,
        circle: Option<&VoteCircle>,
        locations: &[ElectionLocation],
    ) -> String {
        if !self.multiple_territories() {
            return self.title.clone();
        }
        match self.location_for(user, circle, locations) {
            Some(location) => format!("{} en {}", self.title, location.territory(self)),
            None => self.title.clone(),
        }
    }

    /// Serialise locations as `location,version[,override]` lines.
    pub fn locations_text(locations: &[ElectionLocation]) -> String {
        locations
            .iter()
            .map(|l| match &l.override_location {
                Some(o) => format!("{},{},{}", l.location, l.agora_version, o),
                None => format!("{},{}", l.location, l.agora_version),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Election {
    pub async fn find_by_id(id: ElectionId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM elections WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Insert an election, generating a counter key when none was given
    pub async fn insert(new: &NewElection, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        let counter_key = new.counter_key.clone().unwrap_or_else(random_key);
        let census = new.census_file.as_ref();

        let election = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO elections (
                id, title, info_url, starts_at, ends_at, agora_election_id, scope,
                election_type, flags, server, counter_key, voter_id_template,
                user_created_at_max, census_file_name, census_content_type, census_byte_size
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(ElectionId::new())
        .bind(&new.title)
        .bind(&new.info_url)
        .bind(new.starts_at)
        .bind(new.ends_at)
        .bind(new.agora_election_id)
        .bind(new.scope)
        .bind(new.election_type.code())
        .bind(new.flags)
        .bind(&new.server)
        .bind(&counter_key)
        .bind(&new.voter_id_template)
        .bind(new.user_created_at_max)
        .bind(census.map(|c| c.file_name.clone()))
        .bind(census.map(|c| c.content_type.clone()))
        .bind(census.map(|c| c.byte_size))
        .fetch_one(pool)
        .await?;

        tracing::info!(
            election_id = %election.id,
            agora_election_id = election.agora_election_id,
            "election created"
        );
        Ok(election)
    }

    /// Elections running right now
    pub async fn find_active(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM elections WHERE starts_at < $1 AND ends_at > $1 ORDER BY starts_at",
        )
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Elections that have not ended yet
    pub async fn find_future(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM elections WHERE ends_at > $1 ORDER BY starts_at")
            .bind(now)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Starting within 12 hours or finished within 7 days
    pub async fn find_upcoming_finished(now: DateTime<Utc>, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM elections WHERE ends_at > $1 AND starts_at < $2 ORDER BY starts_at",
        )
        .bind(now - Duration::days(7))
        .bind(now + Duration::hours(12))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn valid_votes_count(&self, pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM votes WHERE election_id = $1 AND deleted_at IS NULL",
        )
        .bind(self.id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn locations(&self, pool: &PgPool) -> Result<Vec<ElectionLocation>> {
        ElectionLocation::find_by_election(self.id, pool).await
    }

    /// Create or update the locations listed in `text`
    pub async fn set_locations(&self, text: &str, pool: &PgPool) -> Result<Vec<ElectionLocation>> {
        let mut tx = pool.begin().await?;
        for line in parse_locations(text) {
            sqlx::query(
                r#"
                INSERT INTO election_locations (id, election_id, location, agora_version, override_location)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (election_id, location)
                DO UPDATE SET agora_version = EXCLUDED.agora_version,
                              override_location = EXCLUDED.override_location,
                              updated_at = NOW()
                "#,
            )
            .bind(crate::common::ElectionLocationId::new())
            .bind(self.id)
            .bind(&line.location)
            .bind(line.agora_version)
            .bind(&line.override_location)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.locations(pool).await
    }
}
