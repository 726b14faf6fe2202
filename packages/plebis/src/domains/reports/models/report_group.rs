use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sqlx::PgPool;

use crate::common::{ReportGroupId, ValidationErrors};
use crate::domains::reports::error::ReportError;

pub const TRANSFORMATIONS: [&str; 6] = ["upcase", "downcase", "strip", "to_s", "truncate", "titleize"];
pub const FORMATS: [&str; 4] = ["currency", "date", "integer", "percentage"];
const TRUNCATE_AT: usize = 50;

/// One database row, keyed by column name.
pub type Row = Map<String, JsonValue>;

/// Declarative column extraction applied to every row of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub source: String,
    #[serde(default)]
    pub transformations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRules {
    pub columns: Vec<ColumnRule>,
}

/// Dimension a report counts rows by.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(default)]
pub struct ReportGroup {
    pub id: ReportGroupId,
    pub title: Option<String>,
    pub width: i32,
    pub label: Option<String>,
    pub data_label: Option<String>,
    /// CRLF separated names always folded into the rest bucket
    pub whitelist: Option<String>,
    /// CRLF separated names never folded into the rest bucket
    pub blacklist: Option<String>,
    pub minimum: i32,
    pub minimum_label: Option<String>,
    pub visualization: Option<String>,
    pub transformation_rules: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ReportGroup {
    fn default() -> Self {
        Self {
            id: ReportGroupId::new(),
            title: None,
            width: 0,
            label: None,
            data_label: None,
            whitelist: None,
            blacklist: None,
            minimum: 0,
            minimum_label: None,
            visualization: None,
            transformation_rules: None,
            created_at: None,
            updated_at: None,
        }
    }
}

fn split_lines(list: Option<&str>) -> Vec<String> {
    list.map(|l| l.split("\r\n").map(str::to_string).collect())
        .unwrap_or_default()
}

impl ReportGroup {
    pub fn with_rules(rules: &TransformationRules, width: i32) -> Result<Self> {
        Ok(Self {
            width,
            transformation_rules: Some(serde_json::to_string(rules)?),
            ..Self::default()
        })
    }

    pub fn whitelist(&self) -> Vec<String> {
        split_lines(self.whitelist.as_deref())
    }

    pub fn blacklist(&self) -> Vec<String> {
        split_lines(self.blacklist.as_deref())
    }

    pub fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist().iter().any(|w| w == name)
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist().iter().any(|b| b == name)
    }

    pub fn width(&self) -> usize {
        self.width.max(0) as usize
    }

    /// `name` padded with spaces or cut to exactly `width` characters.
    pub fn format_group_name(&self, name: &str) -> String {
        let width = self.width();
        let mut formatted: String = name.chars().take(width).collect();
        let len = formatted.chars().count();
        formatted.extend(std::iter::repeat(' ').take(width - len));
        formatted
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let Some(raw) = self.transformation_rules.as_deref().filter(|r| !r.trim().is_empty()) else {
            return errors;
        };

        let field = "transformation_rules";
        let value: JsonValue = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => {
                errors.add(field, "must be valid JSON");
                return errors;
            }
        };
        let Some(columns) = value.get("columns").and_then(JsonValue::as_array) else {
            errors.add(field, "must have 'columns' array");
            return errors;
        };

        for column in columns {
            if column.get("source").is_none() {
                errors.add(field, "each column must have 'source'");
            }
            if column.get("output").is_none() {
                errors.add(field, "each column must have 'output'");
            }
            let transformations = column.get("transformations").and_then(JsonValue::as_array);
            for t in transformations.into_iter().flatten().filter_map(JsonValue::as_str) {
                if !TRANSFORMATIONS.contains(&t) {
                    errors.add(field, format!("transformation '{}' not allowed", t));
                }
            }
            if let Some(format) = column.get("format").and_then(JsonValue::as_str) {
                if !FORMATS.contains(&format) {
                    errors.add(field, format!("format '{}' not allowed", format));
                }
            }
        }
        errors
    }

    /// Why this group cannot process rows shaped like `sample`: unreadable
    /// rules, or sources the query does not return.
    pub fn rules_problem(&self, sample: Option<&Row>) -> Option<String> {
        let rules: TransformationRules =
            match serde_json::from_str(self.transformation_rules.as_deref().unwrap_or_default()) {
                Ok(rules) => rules,
                Err(e) => return Some(format!("invalid transformation rules: {}", e)),
            };
        let row = sample?;
        let missing: Vec<&str> = rules
            .columns
            .iter()
            .map(|column| column.source.as_str())
            .filter(|source| !row.contains_key(*source))
            .collect();
        if missing.is_empty() {
            None
        } else {
            Some(format!("columns missing from query: {}", missing.join(", ")))
        }
    }

    /// `(output, value)` pairs extracted from `row`. Unknown
    /// transformations and formats are skipped; unreadable rules give a
    /// single `("ERROR", "ERROR")` pair.
    pub fn process(&self, row: &Row) -> Vec<(String, String)> {
        let rules: TransformationRules =
            match serde_json::from_str(self.transformation_rules.as_deref().unwrap_or_default()) {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::error!(group_id = %self.id, error = %e, "Invalid JSON in report group rules");
                    return vec![("ERROR".to_string(), "ERROR".to_string())];
                }
            };

        rules
            .columns
            .iter()
            .map(|column| {
                let mut value = match row.get(&column.source) {
                    Some(value) => value_to_string(value),
                    None => {
                        tracing::error!(
                            group_id = %self.id,
                            source = %column.source,
                            "Failed to extract column from row"
                        );
                        String::new()
                    }
                };
                for t in &column.transformations {
                    value = transform(t, &value);
                }
                if let Some(format) = &column.format {
                    value = apply_format(format, &value);
                }
                (column.output.clone(), value)
            })
            .collect()
    }

    /// YAML form stored in a report's group columns
    pub fn serialize(group: &ReportGroup) -> Result<String, ReportError> {
        Ok(serde_yaml::to_string(group)?)
    }

    pub fn serialize_list(groups: &[ReportGroup]) -> Result<String, ReportError> {
        Ok(serde_yaml::to_string(groups)?)
    }

    pub fn unserialize(yaml: &str) -> Result<ReportGroup, ReportError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn unserialize_list(yaml: &str) -> Result<Vec<ReportGroup>, ReportError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn transform(name: &str, value: &str) -> String {
    match name {
        "upcase" => value.to_uppercase(),
        "downcase" => value.to_lowercase(),
        "strip" => value.trim().to_string(),
        "to_s" => value.to_string(),
        "truncate" => truncate(value, TRUNCATE_AT),
        "titleize" => titleize(value),
        _ => {
            tracing::warn!(transformation = name, "skipping transformation not allowed");
            value.to_string()
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max - 3).collect();
    cut.push_str("...");
    cut
}

fn titleize(value: &str) -> String {
    value
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn apply_format(format: &str, value: &str) -> String {
    let number = value.trim().parse::<f64>().ok();
    match (format, number) {
        ("currency", Some(n)) => format!("{:.2}", n),
        ("integer", Some(n)) => format!("{}", n.trunc() as i64),
        ("percentage", Some(n)) => format!("{:.2}%", n),
        ("date", _) => parse_date(value)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| value.to_string()),
        _ => value.to_string(),
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.date_naive())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|d| d.date()))
        .or_else(|| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok().map(|d| d.date()))
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ReportGroup {
    pub async fn find_by_id(id: ReportGroupId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM report_groups WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn create(&self, pool: &PgPool) -> Result<Self> {
        self.validate().into_result()?;

        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO report_groups (
                id, title, width, label, data_label, whitelist, blacklist,
                minimum, minimum_label, visualization, transformation_rules
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.title)
        .bind(self.width)
        .bind(&self.label)
        .bind(&self.data_label)
        .bind(&self.whitelist)
        .bind(&self.blacklist)
        .bind(self.minimum)
        .bind(&self.minimum_label)
        .bind(&self.visualization)
        .bind(&self.transformation_rules)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(columns: JsonValue) -> ReportGroup {
        ReportGroup {
            width: 20,
            transformation_rules: Some(json!({ "columns": columns }).to_string()),
            ..ReportGroup::default()
        }
    }

    fn row() -> Row {
        json!({
            "name": "  john  ",
            "email": "john@test.com",
            "amount": 100.5,
            "created_at": "2025-01-15T10:30:00+00:00",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn applies_transformations_in_order() {
        let g = group(json!([
            {"source": "name", "transformations": ["strip", "upcase"], "output": "NAME"},
            {"source": "email", "transformations": [], "output": "EMAIL"},
        ]));
        assert_eq!(
            g.process(&row()),
            vec![
                ("NAME".to_string(), "JOHN".to_string()),
                ("EMAIL".to_string(), "john@test.com".to_string()),
            ]
        );
    }

    #[test]
    fn formats_values() {
        let g = group(json!([
            {"source": "amount", "transformations": ["to_s"], "format": "currency", "output": "AMOUNT"},
            {"source": "amount", "format": "integer", "output": "INT"},
            {"source": "amount", "format": "percentage", "output": "PCT"},
            {"source": "created_at", "format": "date", "output": "DATE"},
        ]));
        let values: Vec<String> = g.process(&row()).into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["100.50", "100", "100.50%", "2025-01-15"]);
    }

    #[test]
    fn truncates_and_titleizes() {
        let g = group(json!([
            {"source": "long", "transformations": ["truncate"], "output": "LONG"},
            {"source": "slug", "transformations": ["titleize"], "output": "TITLE"},
        ]));
        let mut r = row();
        r.insert("long".into(), json!("a".repeat(100)));
        r.insert("slug".into(), json!("comunidad_de madrid"));
        let result = g.process(&r);
        assert_eq!(result[0].1.chars().count(), 50);
        assert!(result[0].1.ends_with("..."));
        assert_eq!(result[1].1, "Comunidad De Madrid");
    }

    #[test]
    fn disallowed_transformations_are_ignored() {
        let g = group(json!([{"source": "email", "transformations": ["system", "eval"], "output": "EMAIL"}]));
        assert_eq!(g.process(&row())[0].1, "john@test.com");
    }

    #[test]
    fn missing_source_gives_empty_value() {
        let g = group(json!([{"source": "non_existent", "transformations": [], "output": "FIELD"}]));
        assert_eq!(g.process(&row()), vec![("FIELD".to_string(), String::new())]);
    }

    #[test]
    fn invalid_rules_process_to_error_pair() {
        let g = ReportGroup {
            transformation_rules: Some("invalid json{{{".to_string()),
            ..ReportGroup::default()
        };
        assert_eq!(g.process(&row()), vec![("ERROR".to_string(), "ERROR".to_string())]);
    }

    #[test]
    fn rules_problems() {
        let g = group(json!([{"source": "nickname", "output": "NICK"}]));
        let problem = g.rules_problem(Some(&row())).unwrap();
        assert!(problem.contains("nickname"), "{}", problem);
        assert_eq!(g.rules_problem(None), None);

        let g = group(json!([{"source": "email", "output": "EMAIL"}]));
        assert_eq!(g.rules_problem(Some(&row())), None);

        let g = ReportGroup {
            transformation_rules: Some("invalid json{{{".to_string()),
            ..ReportGroup::default()
        };
        assert!(g.rules_problem(None).unwrap().starts_with("invalid transformation rules"));
    }

    #[test]
    fn validation_messages() {
        let cases = [
            ("not json".to_string(), "must be valid JSON".to_string()),
            (json!({"invalid": "structure"}).to_string(), "must have 'columns' array".to_string()),
            (
                json!({"columns": [{"output": "NAME"}]}).to_string(),
                "each column must have 'source'".to_string(),
            ),
            (
                json!({"columns": [{"source": "name"}]}).to_string(),
                "each column must have 'output'".to_string(),
            ),
            (
                json!({"columns": [{"source": "name", "transformations": ["invalid_transform"], "output": "N"}]})
                    .to_string(),
                "transformation 'invalid_transform' not allowed".to_string(),
            ),
            (
                json!({"columns": [{"source": "name", "format": "invalid_format", "output": "N"}]}).to_string(),
                "format 'invalid_format' not allowed".to_string(),
            ),
        ];
        for (rules, message) in cases {
            let g = ReportGroup {
                transformation_rules: Some(rules),
                ..ReportGroup::default()
            };
            assert!(g.validate().includes("transformation_rules", &message), "{}", message);
        }
        assert!(ReportGroup::default().validate().is_empty());
    }

    #[test]
    fn group_names_have_fixed_width() {
        let g = ReportGroup {
            width: 10,
            ..ReportGroup::default()
        };
        assert_eq!(g.format_group_name("short"), "short     ");
        assert_eq!(g.format_group_name("verylongname"), "verylongna");
        assert_eq!(g.format_group_name("1234567890"), "1234567890");
    }

    #[test]
    fn white_and_black_lists_split_on_crlf() {
        let g = ReportGroup {
            whitelist: Some("item1\r\nitem2\r\nitem3".to_string()),
            blacklist: Some("bad1\r\nbad2".to_string()),
            ..ReportGroup::default()
        };
        assert_eq!(g.whitelist(), vec!["item1", "item2", "item3"]);
        assert!(g.is_whitelisted("item2"));
        assert!(!g.is_whitelisted("other"));
        assert!(g.is_blacklisted("bad1"));
        assert!(!g.is_blacklisted("okay"));
    }

    #[test]
    fn yaml_keeps_one_group_or_a_list() {
        let g = ReportGroup {
            width: 10,
            minimum: 5,
            ..ReportGroup::default()
        };
        let yaml = ReportGroup::serialize(&g).unwrap();
        assert!(yaml.contains("width: 10"));
        let back = ReportGroup::unserialize(&yaml).unwrap();
        assert_eq!((back.id, back.width, back.minimum), (g.id, 10, 5));

        let other = ReportGroup {
            width: 20,
            ..ReportGroup::default()
        };
        let list = ReportGroup::serialize_list(&[g, other]).unwrap();
        let back = ReportGroup::unserialize_list(&list).unwrap();
        assert_eq!(back.iter().map(|g| g.width).collect::<Vec<_>>(), vec![10, 20]);
    }
}
