use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::utils::{hmac_sha256_hex, sha256_hex};
use crate::common::validation::{BLANK, TAKEN};
use crate::common::{ElectionId, UserId, ValidationErrors, VoteId};
use crate::domains::users::{DocumentType, User};

use super::election::Election;

pub const DEFAULT_VOTER_ID_TEMPLATE: &str =
    "%<secret_key_base>s:%<user_id>s:%<election_id>s:%<scoped_agora_election_id>s";

lazy_static! {
    static ref TEMPLATE_KEY: Regex = Regex::new(r"%<(\w+)>s").unwrap();
}

/// A user's right to vote in an election, bound to a pseudonymous voter id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: VoteId,
    pub user_id: UserId,
    pub election_id: ElectionId,
    pub voter_id: String,
    pub agora_id: Option<i64>,
    pub paper_authority_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Everything the voter id and booth urls are derived from.
pub struct VoteContext<'a> {
    pub user: &'a User,
    pub election: &'a Election,
    /// Booth election id of the user's location.
    pub scoped_agora_election_id: Option<i64>,
    pub secret_key_base: &'a str,
}

impl VoteContext<'_> {
    fn template_value(&self, key: &str) -> Option<String> {
        match key {
            "secret_key_base" => Some(self.secret_key_base.to_string()),
            "user_id" => Some(self.user.id.to_string()),
            "election_id" => Some(self.election.id.to_string()),
            "scoped_agora_election_id" => Some(
                self.scoped_agora_election_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            "normalized_vatid" => {
                let spanish = matches!(
                    self.user.document(),
                    Some(DocumentType::Dni) | Some(DocumentType::Nie)
                );
                Some(normalized_vatid(spanish, &self.user.document_vatid))
            }
            _ => None,
        }
    }

    /// Expand the election's voter id template. Unknown keys stay as written.
    pub fn expand_template(&self) -> String {
        let template = self
            .election
            .voter_id_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_VOTER_ID_TEMPLATE);

        TEMPLATE_KEY
            .replace_all(template, |caps: &Captures| {
                self.template_value(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// 64 character SHA-256 hex of the expanded template.
    pub fn generate_voter_id(&self) -> String {
        sha256_hex(&self.expand_template())
    }
}

/// Uppercase alphanumerics with leading zeros dropped from every digit run
/// (`00123ABC00456` → `123ABC456`).
pub fn normalize_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_number = false;
    for c in value.chars().filter(char::is_ascii_alphanumeric) {
        let c = c.to_ascii_uppercase();
        if c.is_ascii_digit() {
            if c == '0' && !in_number {
                continue;
            }
            in_number = true;
        } else {
            in_number = false;
        }
        out.push(c);
    }
    out
}

/// `DNI` prefix for Spanish documents, `PASS` otherwise.
pub fn normalized_vatid(spanish_nif: bool, vatid: &str) -> String {
    let prefix = if spanish_nif { "DNI" } else { "PASS" };
    format!("{}{}", prefix, normalize_identifier(vatid))
}

impl Vote {
    /// `{voter_id}:AuthEvent:{scoped id}:vote:{unix ts}`
    pub fn generate_message(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}:AuthEvent:{}:vote:{}",
            self.voter_id,
            self.agora_id.map(|id| id.to_string()).unwrap_or_default(),
            now.timestamp()
        )
    }

    pub fn generate_hash(message: &str, shared_key: &str) -> String {
        hmac_sha256_hex(shared_key, message)
    }

    /// Signed booth url for casting the vote.
    pub fn url(&self, server_url: &str, shared_key: &str, now: DateTime<Utc>) -> String {
        let message = self.generate_message(now);
        format!(
            "{}booth/{}/vote/{}/{}",
            server_url,
            self.agora_id.map(|id| id.to_string()).unwrap_or_default(),
            Self::generate_hash(&message, shared_key),
            message
        )
    }

    /// Booth endpoint that checks the HMAC configuration.
    pub fn test_url(&self, server_url: &str, shared_key: &str, now: DateTime<Utc>) -> String {
        let message = self.generate_message(now);
        format!("{}test_hmac/{}/{}", server_url, shared_key, message)
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Vote {
    pub async fn find_by_id(id: VoteId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM votes WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_for_user(
        user_id: UserId,
        election_id: ElectionId,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM votes
            WHERE user_id = $1 AND election_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(election_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Create the user's vote with a freshly generated voter id
    pub async fn create(
        ctx: &VoteContext<'_>,
        paper_authority_id: Option<UserId>,
        pool: &PgPool,
    ) -> Result<Self> {
        let voter_id = ctx.generate_voter_id();

        let mut errors = ValidationErrors::new();
        if voter_id.is_empty() {
            errors.add("voter_id", BLANK);
        }
        if ctx.scoped_agora_election_id.is_none() {
            errors.add("voter_id", "No se pudo generar");
        }
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM votes WHERE voter_id = $1 AND user_id = $2 AND deleted_at IS NULL)",
        )
        .bind(&voter_id)
        .bind(ctx.user.id)
        .fetch_one(pool)
        .await?;
        if taken {
            errors.add("voter_id", TAKEN);
        }
        errors.into_result()?;

        let vote = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO votes (id, user_id, election_id, voter_id, agora_id, paper_authority_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(VoteId::new())
        .bind(ctx.user.id)
        .bind(ctx.election.id)
        .bind(&voter_id)
        .bind(ctx.scoped_agora_election_id)
        .bind(paper_authority_id)
        .fetch_one(pool)
        .await
        .context("Failed to insert vote")?;

        tracing::info!(
            vote_id = %vote.id,
            election_id = %vote.election_id,
            agora_id = ?vote.agora_id,
            "vote created"
        );
        Ok(vote)
    }

    pub async fn soft_delete(id: VoteId, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE votes SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::votes::models::test_support::{election, user};
    use chrono::TimeZone;

    fn vote(agora_id: i64) -> Vote {
        let now = Utc::now();
        Vote {
            id: VoteId::new(),
            user_id: UserId::new(),
            election_id: ElectionId::new(),
            voter_id: "a".repeat(64),
            agora_id: Some(agora_id),
            paper_authority_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn voter_id_is_sha256_hex() {
        let e = election(0);
        let u = user(None);
        let ctx = VoteContext {
            user: &u,
            election: &e,
            scoped_agora_election_id: Some(100000),
            secret_key_base: "secret",
        };
        let voter_id = ctx.generate_voter_id();
        assert_eq!(voter_id.len(), 64);
        assert!(voter_id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn voter_id_differs_per_user() {
        let e = election(0);
        let (a, b) = (user(None), user(None));
        let voter_id = |u: &User| {
            VoteContext {
                user: u,
                election: &e,
                scoped_agora_election_id: Some(100000),
                secret_key_base: "secret",
            }
            .generate_voter_id()
        };
        assert_ne!(voter_id(&a), voter_id(&b));
    }

    #[test]
    fn custom_templates_expand_known_keys() {
        let mut e = election(0);
        e.voter_id_template = Some("%<user_id>s:%<election_id>s:%<unknown>s".to_string());
        let u = user(None);
        let ctx = VoteContext {
            user: &u,
            election: &e,
            scoped_agora_election_id: None,
            secret_key_base: "secret",
        };
        assert_eq!(
            ctx.expand_template(),
            format!("{}:{}:%<unknown>s", u.id, e.id)
        );
    }

    #[test]
    fn message_format() {
        let v = vote(100012);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let message = v.generate_message(at);
        assert_eq!(
            message,
            format!("{}:AuthEvent:100012:vote:{}", v.voter_id, at.timestamp())
        );
    }

    #[test]
    fn booth_urls() {
        let v = vote(100012);
        let now = Utc::now();
        let url = v.url("http://test.com/", "shared", now);
        assert!(url.starts_with("http://test.com/booth/100012/vote/"));
        assert!(url.contains("AuthEvent"));
        let parts: Vec<&str> = url.split('/').collect();
        assert_eq!(parts[parts.len() - 2].len(), 64);

        let test_url = v.test_url("http://test.com/", "test_key", now);
        assert!(test_url.starts_with("http://test.com/test_hmac/"));
        assert!(test_url.contains("test_key"));
    }

    #[test]
    fn hash_is_deterministic_hmac() {
        let a = Vote::generate_hash("message1", "key");
        assert_eq!(a.len(), 64);
        assert_eq!(a, Vote::generate_hash("message1", "key"));
        assert_ne!(a, Vote::generate_hash("message2", "key"));
    }

    #[test]
    fn identifiers_are_normalized() {
        assert_eq!(normalize_identifier("ABC-123.456"), "ABC123456");
        assert_eq!(normalize_identifier("abc123xyz"), "ABC123XYZ");
        assert_eq!(normalize_identifier("00123ABC00456"), "123ABC456");
        assert_eq!(normalize_identifier("12345678A"), "12345678A");
    }

    #[test]
    fn vatids_are_prefixed() {
        assert_eq!(normalized_vatid(true, "01234567-A"), "DNI1234567A");
        assert!(normalized_vatid(false, "ABC123456").starts_with("PASS"));
    }
}
