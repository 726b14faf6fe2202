use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;

use crate::common::{ValidationErrors, VoteCircleId};
use crate::domains::votes::territory::TownCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteCircleKind {
    Interno,
    Barrial,
    Municipal,
    Comarcal,
    Exterior,
}

impl VoteCircleKind {
    /// Two letter prefix used in circle codes.
    pub fn code_prefix(self) -> Option<&'static str> {
        match self {
            Self::Barrial => Some("TB"),
            Self::Municipal => Some("TM"),
            Self::Comarcal => Some("TC"),
            Self::Interno | Self::Exterior => None,
        }
    }
}

impl fmt::Display for VoteCircleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interno => write!(f, "interno"),
            Self::Barrial => write!(f, "barrial"),
            Self::Municipal => write!(f, "municipal"),
            Self::Comarcal => write!(f, "comarcal"),
            Self::Exterior => write!(f, "exterior"),
        }
    }
}

impl FromStr for VoteCircleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interno" => Ok(Self::Interno),
            "barrial" => Ok(Self::Barrial),
            "municipal" => Ok(Self::Municipal),
            "comarcal" => Ok(Self::Comarcal),
            "exterior" => Ok(Self::Exterior),
            _ => Err(anyhow::anyhow!("Invalid vote circle kind: {}", s)),
        }
    }
}

/// Kind implied by the prefix of an imported circle code.
pub fn type_from_original_code(original_code: &str) -> VoteCircleKind {
    match original_code.get(..2) {
        Some("TB") => VoteCircleKind::Barrial,
        Some("TM") => VoteCircleKind::Municipal,
        Some("TC") => VoteCircleKind::Comarcal,
        Some("IP") => VoteCircleKind::Interno,
        _ => VoteCircleKind::Exterior,
    }
}

/// Circle code for a town: prefix, autonomy, province, town and a two digit
/// sequence (`TM1328079` + `01`). Exterior circles use `"00"`; anything
/// else, or an unknown town, gives `""`.
pub fn code_circle(town: &str, kind: VoteCircleKind, sequence: u32) -> String {
    if kind == VoteCircleKind::Exterior {
        return "00".to_string();
    }
    let Some(prefix) = kind.code_prefix() else {
        return String::new();
    };
    let Some(town) = TownCode::parse(town) else {
        return String::new();
    };
    let Some(autonomy) = town.autonomy() else {
        return String::new();
    };
    format!(
        "{}{}{}{}{:02}",
        prefix,
        &autonomy[2..],
        town.province,
        town.town,
        sequence % 100
    )
}

/// A local assembly members vote in.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoteCircle {
    pub id: VoteCircleId,
    /// Numeric code used as the election location of circle-scoped elections.
    pub location_number: i32,
    pub name: String,
    pub original_name: Option<String>,
    pub code: String,
    pub original_code: Option<String>,
    pub kind: String,
    pub town: Option<String>,
    pub province_code: Option<String>,
    pub autonomy_code: Option<String>,
    pub island_code: Option<String>,
    pub region_area_id: Option<i32>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VoteCircle {
    pub fn kind(&self) -> Option<VoteCircleKind> {
        self.kind.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.kind() != Some(VoteCircleKind::Interno)
    }

    pub fn in_spain(&self) -> bool {
        matches!(
            self.kind(),
            Some(VoteCircleKind::Barrial | VoteCircleKind::Municipal | VoteCircleKind::Comarcal)
        )
    }

    pub fn code_in_spain(&self) -> bool {
        ["TB", "TM", "TC"].iter().any(|p| self.code.starts_with(p))
    }

    /// Fills the code from the original code when missing and derives the
    /// territory columns from the town.
    pub fn prepare_for_save(&mut self) {
        if self.code.trim().is_empty() {
            if let Some(original) = &self.original_code {
                self.code = original.clone();
            }
        }
        if let Some(town) = self.town.as_deref().and_then(TownCode::parse) {
            self.province_code = Some(format!("p_{}", town.province));
            self.autonomy_code = town.autonomy().map(str::to_string);
            self.country_code.get_or_insert_with(|| "ES".to_string());
        }
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        if self.kind().is_none() {
            errors.add("kind", crate::common::validation::NOT_INCLUDED);
        }
        errors
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl VoteCircle {
    pub async fn find_by_id(id: VoteCircleId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM vote_circles WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_code(code: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM vote_circles WHERE code = $1")
            .bind(code)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Next free two digit sequence for circles of a town and kind
    pub async fn next_sequence(town: &str, kind: VoteCircleKind, pool: &PgPool) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vote_circles WHERE town = $1 AND kind = $2",
        )
        .bind(town)
        .bind(kind.to_string())
        .fetch_one(pool)
        .await?;
        Ok(count as u32 + 1)
    }

    pub async fn insert(mut self, pool: &PgPool) -> Result<Self> {
        self.prepare_for_save();
        self.validate().into_result()?;

        let circle = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO vote_circles (
                id, name, original_name, code, original_code, kind, town,
                province_code, autonomy_code, island_code, region_area_id, country_code
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.name)
        .bind(&self.original_name)
        .bind(&self.code)
        .bind(&self.original_code)
        .bind(&self.kind)
        .bind(&self.town)
        .bind(&self.province_code)
        .bind(&self.autonomy_code)
        .bind(&self.island_code)
        .bind(self.region_area_id)
        .bind(&self.country_code)
        .fetch_one(pool)
        .await?;

        tracing::info!(vote_circle_id = %circle.id, code = %circle.code, "vote circle created");
        Ok(circle)
    }
}
