use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use super::user::User;
use crate::common::{is_blank, SpamFilterId, ValidationErrors};

pub const FIELDS: [&str; 6] = [
    "email",
    "first_name",
    "last_name",
    "document_vatid",
    "country",
    "created_at",
];
pub const OPERATORS: [&str; 5] = ["equals", "contains", "matches", "in_list", "less_than_days_ago"];

/// `in_list` value that stands for the filter's own `data` lines
pub const DATA_LIST: &str = "DATA_LIST";

#[derive(Debug, Clone, Deserialize)]
struct Condition {
    field: String,
    operator: String,
    #[serde(default)]
    value: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
struct FilterRules {
    conditions: Vec<Condition>,
    #[serde(default)]
    logic: Option<String>,
}

impl FilterRules {
    fn any_condition(&self) -> bool {
        self.logic
            .as_deref()
            .is_some_and(|logic| logic.eq_ignore_ascii_case("or"))
    }
}

enum FieldValue<'a> {
    Text(&'a str),
    Time(DateTime<Utc>),
}

fn field_value<'a>(user: &'a User, field: &str) -> Option<FieldValue<'a>> {
    match field {
        "email" => Some(FieldValue::Text(&user.email)),
        "first_name" => Some(FieldValue::Text(&user.first_name)),
        "last_name" => Some(FieldValue::Text(&user.last_name)),
        "document_vatid" => Some(FieldValue::Text(&user.document_vatid)),
        "country" => Some(FieldValue::Text(&user.country)),
        "created_at" => Some(FieldValue::Time(user.created_at)),
        _ => None,
    }
}

fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Rule set that flags suspicious sign-ups.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SpamFilter {
    pub id: SpamFilterId,
    pub name: String,
    /// Newline separated values for `in_list` conditions
    pub data: Option<String>,
    pub rules_json: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewSpamFilter {
    pub name: String,
    #[builder(default)]
    pub data: Option<String>,
    pub rules_json: String,
    #[builder(default = true)]
    pub active: bool,
}

/// Structural checks on a rules document. Blank rules are accepted.
pub fn validate_rules(raw: Option<&str>) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return errors;
    };

    let field = "rules_json";
    let value: JsonValue = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            errors.add(field, "must be valid JSON");
            return errors;
        }
    };
    let Some(conditions) = value.get("conditions").and_then(JsonValue::as_array) else {
        errors.add(field, "must have 'conditions' array");
        return errors;
    };

    for condition in conditions {
        match condition.get("field").and_then(JsonValue::as_str) {
            Some(name) if FIELDS.contains(&name) => {}
            Some(name) => errors.add(field, format!("field '{}' not allowed", name)),
            None => errors.add(field, "each condition must have 'field'"),
        }
        match condition.get("operator").and_then(JsonValue::as_str) {
            Some(op) if OPERATORS.contains(&op) => {}
            Some(op) => errors.add(field, format!("operator '{}' not allowed", op)),
            None => errors.add(field, "each condition must have 'operator'"),
        }
    }
    errors
}

impl NewSpamFilter {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = validate_rules(Some(&self.rules_json));
        errors.require_present("name", Some(&self.name));
        errors
    }
}

impl SpamFilter {
    pub fn data_list(&self) -> Vec<&str> {
        self.data
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Whether `user` matches the rules. Rules that cannot be read, unknown
    /// fields and unknown operators never match.
    pub fn process(&self, user: &User, now: DateTime<Utc>) -> bool {
        let Some(raw) = self.rules_json.as_deref().filter(|r| !is_blank(Some(r))) else {
            return false;
        };
        let rules: FilterRules = match serde_json::from_str(raw) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(filter_id = %self.id, error = %e, "Invalid JSON in spam filter rules");
                return false;
            }
        };
        if rules.conditions.is_empty() {
            return false;
        }

        let mut results = rules.conditions.iter().map(|c| self.condition_holds(c, user, now));
        if rules.any_condition() {
            results.any(|held| held)
        } else {
            results.all(|held| held)
        }
    }

    fn condition_holds(&self, condition: &Condition, user: &User, now: DateTime<Utc>) -> bool {
        if !FIELDS.contains(&condition.field.as_str()) {
            tracing::warn!(filter_id = %self.id, field = %condition.field, "spam filter field not allowed");
            return false;
        }
        let Some(actual) = field_value(user, &condition.field) else {
            return false;
        };

        match (condition.operator.as_str(), actual) {
            ("equals", FieldValue::Text(text)) => text == value_text(&condition.value),
            ("contains", FieldValue::Text(text)) => text.contains(&value_text(&condition.value)),
            ("matches", FieldValue::Text(text)) => match Regex::new(&value_text(&condition.value)) {
                Ok(pattern) => pattern.is_match(text),
                Err(e) => {
                    tracing::warn!(filter_id = %self.id, error = %e, "invalid spam filter pattern");
                    false
                }
            },
            ("in_list", FieldValue::Text(text)) => match &condition.value {
                JsonValue::String(s) if s == DATA_LIST => self.data_list().contains(&text),
                JsonValue::Array(items) => items.iter().any(|item| value_text(item) == text),
                other => value_text(other) == text,
            },
            ("less_than_days_ago", FieldValue::Time(at)) => {
                let days = match &condition.value {
                    JsonValue::Number(n) => n.as_f64(),
                    other => value_text(other).trim().parse().ok(),
                };
                days.is_some_and(|days| at > now - Duration::seconds((days * 86_400.0) as i64))
            }
            (operator, _) => {
                if !OPERATORS.contains(&operator) {
                    tracing::warn!(filter_id = %self.id, operator, "spam filter operator not allowed");
                }
                false
            }
        }
    }

    /// Name of the first active filter matching `user`.
    pub async fn any(user: &User, now: DateTime<Utc>, pool: &PgPool) -> Result<Option<String>> {
        let matched = Self::find_active(pool)
            .await?
            .into_iter()
            .find(|filter| filter.process(user, now))
            .map(|filter| filter.name);
        if let Some(name) = &matched {
            tracing::info!(user_id = %user.id, filter = %name, "user matched spam filter");
        }
        Ok(matched)
    }

    // =========================================================================
    // SQL Queries
    // =========================================================================

    pub async fn create(new: &NewSpamFilter, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;

        let filter = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO spam_filters (id, name, data, rules_json, active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(SpamFilterId::new())
        .bind(new.name.trim())
        .bind(&new.data)
        .bind(&new.rules_json)
        .bind(new.active)
        .fetch_one(pool)
        .await?;

        tracing::info!(filter_id = %filter.id, name = %filter.name, "spam filter created");
        Ok(filter)
    }

    pub async fn find_active(pool: &PgPool) -> Result<Vec<Self>> {
        let filters = sqlx::query_as::<_, Self>(
            "SELECT * FROM spam_filters WHERE active = true ORDER BY created_at, id",
        )
        .fetch_all(pool)
        .await?;
        Ok(filters)
    }

    pub async fn set_active(&mut self, active: bool, pool: &PgPool) -> Result<()> {
        *self = sqlx::query_as::<_, Self>(
            "UPDATE spam_filters SET active = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(active)
        .fetch_one(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UserId;
    use serde_json::json;

    fn filter(rules: JsonValue) -> SpamFilter {
        let now = Utc::now();
        SpamFilter {
            id: SpamFilterId::new(),
            name: "Test".to_string(),
            data: None,
            rules_json: Some(rules.to_string()),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn user(email: &str, first_name: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: "García".to_string(),
            document_type: 1,
            document_vatid: "12345678Z".to_string(),
            country: "ES".to_string(),
            born_at: None,
            vote_town: None,
            vote_island_code: None,
            vote_circle_id: None,
            admin: false,
            confirmed_at: None,
            sms_confirmed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn single(field: &str, operator: &str, value: JsonValue) -> SpamFilter {
        filter(json!({
            "conditions": [{ "field": field, "operator": operator, "value": value }],
            "logic": "AND"
        }))
    }

    #[test]
    fn text_operators() {
        let now = Utc::now();
        let spam = user("test@spam.com", "Ana");
        let legit = user("test@example.com", "Ana");

        for f in [
            single("email", "equals", json!("test@spam.com")),
            single("email", "contains", json!("spam")),
            single("email", "matches", json!("@spam\\.com$")),
        ] {
            assert!(f.process(&spam, now));
            assert!(!f.process(&legit, now));
        }
    }

    #[test]
    fn in_list_reads_filter_data() {
        let now = Utc::now();
        let mut f = single("email", "in_list", json!(DATA_LIST));
        f.data = Some("spam@test.com\r\nbad@test.com\n".to_string());

        assert!(f.process(&user("bad@test.com", "Ana"), now));
        assert!(!f.process(&user("good@example.com", "Ana"), now));
    }

    #[test]
    fn and_or_logic() {
        let now = Utc::now();
        let conditions = json!([
            { "field": "email", "operator": "contains", "value": "spam" },
            { "field": "first_name", "operator": "equals", "value": "Spammer" }
        ]);
        let all = filter(json!({ "conditions": conditions, "logic": "AND" }));
        let any = filter(json!({ "conditions": conditions, "logic": "OR" }));

        let both = user("x@spam.com", "Spammer");
        let email_only = user("x@spam.com", "Ana");
        let neither = user("x@example.com", "Ana");

        assert!(all.process(&both, now));
        assert!(!all.process(&email_only, now));
        assert!(any.process(&email_only, now));
        assert!(!any.process(&neither, now));
    }

    #[test]
    fn recent_registrations() {
        let now = Utc::now();
        let f = single("created_at", "less_than_days_ago", json!(7));
        let mut fresh = user("a@example.com", "Ana");
        fresh.created_at = now - Duration::days(3);
        let mut old = user("b@example.com", "Ana");
        old.created_at = now - Duration::days(10);

        assert!(f.process(&fresh, now));
        assert!(!f.process(&old, now));
    }

    #[test]
    fn unknown_fields_and_operators_never_match() {
        let now = Utc::now();
        let u = user("spam@test.com", "Ana");

        assert!(!single("password", "equals", json!("secret")).process(&u, now));
        assert!(!single("email", "eval", json!("1+1")).process(&u, now));
        assert!(!single("email", "system", json!("rm -rf /")).process(&u, now));
        assert!(!single("email", "matches", json!("(unclosed")).process(&u, now));
        assert!(!single("created_at", "contains", json!("2024")).process(&u, now));
    }

    #[test]
    fn unreadable_rules_never_match() {
        let now = Utc::now();
        let u = user("spam@test.com", "Ana");

        let mut broken = filter(json!({}));
        broken.rules_json = Some("invalid json{{{".to_string());
        assert!(!broken.process(&u, now));
        assert!(!filter(json!({ "logic": "AND" })).process(&u, now));
        assert!(!filter(json!({ "conditions": [] })).process(&u, now));
    }

    #[test]
    fn rules_validation_messages() {
        let cases = [
            ("not json", "must be valid JSON"),
            (r#"{"logic":"AND"}"#, "must have 'conditions' array"),
            (
                r#"{"conditions":[{"field":"invalid_field","operator":"equals","value":"x"}]}"#,
                "field 'invalid_field' not allowed",
            ),
            (
                r#"{"conditions":[{"field":"email","operator":"invalid_op","value":"x"}]}"#,
                "operator 'invalid_op' not allowed",
            ),
        ];
        for (raw, message) in cases {
            let errors = validate_rules(Some(raw));
            assert!(errors.includes("rules_json", message), "{raw}");
        }
        assert!(validate_rules(Some("  ")).is_empty());
    }
}
