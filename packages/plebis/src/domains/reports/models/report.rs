use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::path::Path;

use crate::common::{ReportId, ValidationErrors};
use crate::domains::reports::error::ReportError;
use crate::domains::reports::rank::{aggregate_group, RawWriter, ReportFolders, ReportResults};

use super::report_group::{ReportGroup, Row};

pub const BATCH_SIZE: i64 = 1000;

/// Stored query plus the groups its rows are counted by.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: ReportId,
    pub title: String,
    /// Admin written `SELECT`; rows must expose an `id` column
    pub query: String,
    /// YAML of a single group
    pub main_group: Option<String>,
    /// YAML list of groups
    pub groups: Option<String>,
    /// YAML of the last run
    pub results: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    pub fn main_group(&self) -> Result<Option<ReportGroup>, ReportError> {
        self.main_group
            .as_deref()
            .filter(|yaml| !yaml.trim().is_empty())
            .map(ReportGroup::unserialize)
            .transpose()
    }

    pub fn groups(&self) -> Result<Vec<ReportGroup>, ReportError> {
        match self.groups.as_deref().filter(|yaml| !yaml.trim().is_empty()) {
            Some(yaml) => ReportGroup::unserialize_list(yaml),
            None => Ok(Vec::new()),
        }
    }

    pub fn results(&self) -> Result<Option<ReportResults>> {
        self.results
            .as_deref()
            .map(|yaml| serde_yaml::from_str(yaml).context("Invalid report results"))
            .transpose()
    }
}

/// `id` column of a row, whether numeric or textual.
/// `"{group}: {problem}"` for every group that cannot process the rows.
fn rules_problems(groups: &[ReportGroup], sample: Option<&Row>) -> Vec<String> {
    groups
        .iter()
        .filter_map(|group| {
            let problem = group.rules_problem(sample)?;
            let name = group.title.clone().unwrap_or_else(|| group.id.to_string());
            tracing::warn!(group_id = %group.id, %problem, "report group cannot process rows");
            Some(format!("{}: {}", name, problem))
        })
        .collect()
}

fn row_id(row: &Row) -> String {
    match row.get("id") {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl Report {
    pub async fn find_by_id(id: ReportId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM reports WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn create(
        title: &str,
        query: &str,
        main_group: Option<&ReportGroup>,
        groups: &[ReportGroup],
        pool: &PgPool,
    ) -> Result<Self> {
        let mut errors = ValidationErrors::new();
        errors.require_present("title", Some(title));
        errors.require_present("query", Some(query));
        for group in main_group.into_iter().chain(groups) {
            errors.merge(group.validate());
        }
        errors.into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO reports (id, title, query, main_group, groups)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(ReportId::new())
        .bind(title)
        .bind(query)
        .bind(main_group.map(ReportGroup::serialize).transpose()?)
        .bind(ReportGroup::serialize_list(groups)?)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Character width of the longest row id the query returns.
    async fn id_width(&self, pool: &PgPool) -> Result<usize, ReportError> {
        let sql = format!(
            "SELECT COALESCE(MAX(LENGTH(q.id::text)), 0)::int8 FROM ({}) q",
            self.query
        );
        let width: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
        Ok(width.max(0) as usize)
    }

    async fn fetch_batch(&self, offset: i64, pool: &PgPool) -> Result<Vec<Row>, ReportError> {
        let sql = format!("SELECT to_jsonb(q) FROM ({}) q LIMIT $1 OFFSET $2", self.query);
        let rows: Vec<JsonValue> = sqlx::query_scalar(&sql)
            .bind(BATCH_SIZE)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    /// Runs the query in batches, ranks every group under
    /// `{reports_dir}/{id}` and stores the results as YAML.
    pub async fn run(&self, reports_dir: &Path, pool: &PgPool) -> Result<Self, ReportError> {
        let main_group = self.main_group()?;
        let groups = self.groups()?;
        if groups.is_empty() {
            return Err(ReportError::NoGroups);
        }

        let folders = ReportFolders::create(reports_dir, &self.id.to_string())?;
        let id_width = self.id_width(pool).await?;
        tracing::info!(report_id = %self.id, groups = groups.len(), id_width, "report run started");

        let mut writers = groups
            .iter()
            .map(|group| RawWriter::create(folders.raw_file(&group.id.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let mut offset = 0;
        let mut rows_seen = 0usize;
        let mut fetch_errors = None;
        loop {
            let batch = self.fetch_batch(offset, pool).await?;
            if fetch_errors.is_none() {
                fetch_errors = Some(rules_problems(&groups, batch.first()));
            }
            if batch.is_empty() {
                break;
            }
            offset += BATCH_SIZE;
            rows_seen += batch.len();

            for row in &batch {
                let id = format!("{:<width$}", row_id(row), width = id_width);
                let main_name = match &main_group {
                    Some(main) => {
                        let name = main.process(row).into_iter().next().map(|(name, _)| name);
                        main.format_group_name(&name.unwrap_or_default())
                    }
                    None => String::new(),
                };
                for (group, writer) in groups.iter().zip(writers.iter_mut()) {
                    for (name, data) in group.process(row) {
                        writer.write_line(&format!(
                            "{}{}{} {}",
                            id,
                            main_name,
                            group.format_group_name(&name),
                            data
                        ))?;
                    }
                }
            }
        }
        for writer in writers {
            writer.finish()?;
        }

        let mut results = ReportResults::default();
        results.errors.fetch = fetch_errors.unwrap_or_default();
        for group in &groups {
            aggregate_group(&folders, group, main_group.as_ref(), id_width, &mut results)?;
        }

        let yaml = serde_yaml::to_string(&results)?;
        let saved = sqlx::query_as::<_, Self>(
            "UPDATE reports SET results = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(yaml)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            report_id = %self.id,
            rows = rows_seen,
            errors = results.errors.fetch.len(),
            "report run finished"
        );
        Ok(saved)
    }
}
