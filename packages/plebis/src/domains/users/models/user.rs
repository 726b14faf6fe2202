use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use typed_builder::TypedBuilder;

use crate::common::validation::{BLANK, INVALID, TAKEN};
use crate::common::{is_blank, UserId, ValidationErrors, VoteCircleId};
use crate::domains::votes::territory::TownCode;

/// A registered member of the platform.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub document_type: i32, // 1 = DNI, 2 = NIE, 3 = passport
    pub document_vatid: String,
    pub country: String,
    pub born_at: Option<NaiveDate>,
    pub vote_town: Option<String>,
    pub vote_island_code: Option<String>,
    pub vote_circle_id: Option<VoteCircleId>,
    pub admin: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub sms_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Dni,
    Nie,
    Passport,
}

impl DocumentType {
    pub fn code(self) -> i32 {
        match self {
            Self::Dni => 1,
            Self::Nie => 2,
            Self::Passport => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Dni),
            2 => Some(Self::Nie),
            3 => Some(Self::Passport),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dni => write!(f, "dni"),
            Self::Nie => write!(f, "nie"),
            Self::Passport => write!(f, "passport"),
        }
    }
}

impl FromStr for DocumentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dni" => Ok(Self::Dni),
            "nie" => Ok(Self::Nie),
            "passport" => Ok(Self::Passport),
            _ => Err(anyhow::anyhow!("Invalid document type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[builder(default = DocumentType::Dni)]
    pub document_type: DocumentType,
    pub document_vatid: String,
    #[builder(default = "ES".to_string())]
    pub country: String,
    #[builder(default)]
    pub born_at: Option<NaiveDate>,
    #[builder(default)]
    pub vote_town: Option<String>,
    #[builder(default)]
    pub vote_island_code: Option<String>,
    #[builder(default)]
    pub vote_circle_id: Option<VoteCircleId>,
    #[builder(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub sms_confirmed_at: Option<DateTime<Utc>>,
}

impl NewUser {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("email", Some(&self.email));
        if !is_blank(Some(&self.email)) && !self.email.contains('@') {
            errors.add("email", INVALID);
        }
        errors.require_present("first_name", Some(&self.first_name));
        errors.require_present("last_name", Some(&self.last_name));
        errors.require_present("document_vatid", Some(&self.document_vatid));
        errors
    }
}

impl User {
    /// Both the email and the phone were confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some() && self.sms_confirmed_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn document(&self) -> Option<DocumentType> {
        DocumentType::from_code(self.document_type)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    fn town(&self) -> Option<TownCode> {
        self.vote_town.as_deref().and_then(TownCode::parse)
    }

    /// Two digit province code of the voting town, or `""`.
    pub fn vote_province_numeric(&self) -> String {
        self.town().map(|t| t.province).unwrap_or_default()
    }

    /// Two digit autonomy number (`09` for Cataluña), or `"-"` when the
    /// voting province is unknown.
    pub fn vote_autonomy_numeric(&self) -> String {
        self.town()
            .and_then(|t| t.autonomy())
            .map(|code| code[2..].to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    /// Province, town and control digits (`080796`), or `""`.
    pub fn vote_town_numeric(&self) -> String {
        self.town().map(|t| t.numeric()).unwrap_or_default()
    }

    pub fn vote_island_numeric(&self) -> String {
        self.vote_island_code
            .as_deref()
            .filter(|code| code.chars().count() > 2)
            .map(|code| code.chars().skip(2).collect())
            .unwrap_or_default()
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl User {
    pub async fn find_by_id(id: UserId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    /// Live user holding the identity document, ignoring case
    pub async fn find_by_document_vatid(document_vatid: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM users WHERE upper(document_vatid) = upper($1) AND deleted_at IS NULL",
        )
        .bind(document_vatid.trim())
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Case-insensitive lookup among live users
    pub async fn find_by_email(email: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM users WHERE LOWER(email) = LOWER($1) AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn insert(new: &NewUser, pool: &PgPool) -> Result<Self> {
        let mut errors = new.validate();
        if Self::find_by_email(&new.email, pool).await?.is_some() {
            errors.add("email", TAKEN);
        }
        let vatid_taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(document_vatid) = LOWER($1) AND deleted_at IS NULL)",
        )
        .bind(&new.document_vatid)
        .fetch_one(pool)
        .await?;
        if vatid_taken && !errors.includes("document_vatid", BLANK) {
            errors.add("document_vatid", TAKEN);
        }
        errors.into_result()?;

        let user = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO users (
                id, email, first_name, last_name, document_type, document_vatid, country,
                born_at, vote_town, vote_island_code, vote_circle_id, confirmed_at, sms_confirmed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(UserId::new())
        .bind(new.email.trim())
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(new.document_type.code())
        .bind(&new.document_vatid)
        .bind(&new.country)
        .bind(new.born_at)
        .bind(&new.vote_town)
        .bind(&new.vote_island_code)
        .bind(new.vote_circle_id)
        .bind(new.confirmed_at)
        .bind(new.sms_confirmed_at)
        .fetch_one(pool)
        .await?;

        tracing::info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Count of live users with both confirmations
    pub async fn count_confirmed(pool: &PgPool) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE confirmed_at IS NOT NULL
              AND sms_confirmed_at IS NOT NULL
              AND deleted_at IS NULL
            "#,
        )
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn soft_delete(id: UserId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE users SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(vote_town: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(),
            email: "ana@example.org".to_string(),
            first_name: "Ana".to_string(),
            last_name: "García".to_string(),
            document_type: 1,
            document_vatid: "12345678Z".to_string(),
            country: "ES".to_string(),
            born_at: None,
            vote_town: vote_town.map(str::to_string),
            vote_island_code: None,
            vote_circle_id: None,
            admin: false,
            confirmed_at: Some(now),
            sms_confirmed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn confirmation_needs_email_and_phone() {
        let mut u = user(None);
        assert!(!u.is_confirmed());
        u.sms_confirmed_at = Some(Utc::now());
        assert!(u.is_confirmed());
    }

    #[test]
    fn vote_location_numbers() {
        let u = user(Some("m_08_079_6"));
        assert_eq!(u.vote_province_numeric(), "08");
        assert_eq!(u.vote_autonomy_numeric(), "09");
        assert_eq!(u.vote_town_numeric(), "080796");

        let nowhere = user(None);
        assert_eq!(nowhere.vote_province_numeric(), "");
        assert_eq!(nowhere.vote_autonomy_numeric(), "-");
        assert_eq!(nowhere.vote_town_numeric(), "");
    }

    #[test]
    fn island_numeric_drops_prefix() {
        let mut u = user(None);
        u.vote_island_code = Some("i_73".to_string());
        assert_eq!(u.vote_island_numeric(), "73");
    }

    #[test]
    fn island_numeric_counts_characters() {
        let mut u = user(None);
        u.vote_island_code = Some("iñ7".to_string());
        assert_eq!(u.vote_island_numeric(), "7");
        u.vote_island_code = Some("iñ".to_string());
        assert_eq!(u.vote_island_numeric(), "");
    }

    #[test]
    fn document_type_codes() {
        assert_eq!(DocumentType::from_code(2), Some(DocumentType::Nie));
        assert_eq!(DocumentType::from_code(7), None);
        assert_eq!("passport".parse::<DocumentType>().unwrap().code(), 3);
    }

    #[test]
    fn new_user_validation() {
        let new = NewUser::builder()
            .email("not-an-email")
            .first_name("")
            .last_name("López")
            .document_vatid("12345678Z")
            .build();
        let errors = new.validate();
        assert!(errors.includes("email", INVALID));
        assert!(errors.includes("first_name", BLANK));
        assert!(errors.get("last_name").is_empty());
    }
}
