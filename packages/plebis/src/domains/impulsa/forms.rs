//! Admin-defined forms for Impulsa projects.
//!
//! Editions configure two forms per category: the wizard projects fill in and
//! the evaluation filled in by each evaluator. Both share the same layout:
//!
//! ```json
//! {"steps": [{"name": "s1", "title": "Proyecto", "groups": [
//!     {"name": "g1", "fields": [{"name": "budget", "type": "number"}]}
//! ]}]}
//! ```
//!
//! Answers live in a flat map keyed by `"{group}.{field}"`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::common::utils::{email_error, is_web_url, validate_cif, validate_nie, validate_nif};

/// Answers keyed by `"{group}.{field}"`.
pub type FormValues = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    #[serde(default)]
    pub steps: Vec<FormStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormStep {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub groups: Vec<FormGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormGroup {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub kind: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Name of the step whose number fields this field totals.
    #[serde(default)]
    pub sum: Option<String>,
    /// Column name used when exporting the answer.
    #[serde(default)]
    pub export: Option<String>,
    /// Option value → label for `select` and `check_boxes`.
    #[serde(default)]
    pub collection: BTreeMap<String, String>,
}

fn default_field_type() -> String {
    "text".to_string()
}

pub fn value_key(group: &str, field: &str) -> String {
    format!("{}.{}", group, field)
}

fn is_blank_value(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(JsonValue::Array(items)) => items.iter().all(|v| is_blank_value(Some(v))),
        Some(_) => false,
    }
}

fn text_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

fn number_of(value: Option<&JsonValue>) -> i64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

impl FormField {
    /// Message for the first rule `value` breaks.
    pub fn error(&self, value: Option<&JsonValue>) -> Option<String> {
        if is_blank_value(value) {
            return (!self.optional).then(|| "es obligatorio".to_string());
        }
        let text = value.and_then(text_of)?;
        let format = self.format.as_deref();

        if format == Some("accept") && text != "1" {
            return Some("debe ser aceptado".to_string());
        }
        if let Some(limit) = self.limit {
            if text.chars().count() > limit {
                return Some(format!("puede tener hasta {} caracteres", limit));
            }
        }
        match format {
            Some("cif") if !validate_cif(&text) => return Some("no es un NIF correcto".to_string()),
            Some("dni") if !validate_nif(&text) => return Some("no es un DNI correcto".to_string()),
            Some("nie") if !validate_nie(&text) => return Some("no es un NIE correcto".to_string()),
            Some("dninie") if !(validate_nif(&text) || validate_nie(&text)) => {
                return Some("no es un DNI o NIE correcto".to_string())
            }
            _ => {}
        }
        if self.kind == "url" && !is_web_url(&text) {
            return Some("no es una dirección web válida".to_string());
        }
        if self.kind == "email" {
            return email_error(&text).map(str::to_string);
        }
        None
    }

    /// Export representation: collection labels for choice fields.
    fn export_value(&self, value: &JsonValue) -> JsonValue {
        let label = |v: &JsonValue| {
            text_of(v)
                .and_then(|key| self.collection.get(&key).cloned())
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null)
        };
        match (self.kind.as_str(), value) {
            ("check_boxes", JsonValue::Array(items)) => JsonValue::Array(
                items
                    .iter()
                    .filter(|v| !is_blank_value(Some(v)))
                    .map(label)
                    .collect(),
            ),
            ("select", v) => label(v),
            (_, v) => v.clone(),
        }
    }
}

impl Form {
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).context("Invalid form definition")
    }

    pub fn step(&self, name: &str) -> Option<&FormStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Field with its step, looked up by group and field name.
    pub fn field(&self, group: &str, field: &str) -> Option<(&FormStep, &FormField)> {
        self.steps.iter().find_map(|step| {
            step.groups
                .iter()
                .filter(|g| g.name == group)
                .flat_map(|g| g.fields.iter())
                .find(|f| f.name == field)
                .map(|f| (step, f))
        })
    }

    fn fields(&self) -> impl Iterator<Item = (&FormStep, &FormGroup, &FormField)> {
        self.steps.iter().flat_map(|step| {
            step.groups
                .iter()
                .flat_map(move |group| group.fields.iter().map(move |field| (step, group, field)))
        })
    }

    /// `(key, message)` for every invalid field of `step`.
    pub fn step_errors(&self, step: &str, values: &FormValues) -> Vec<(String, String)> {
        self.fields()
            .filter(|(s, _, _)| s.name == step)
            .filter_map(|(_, group, field)| {
                let key = value_key(&group.name, &field.name);
                field.error(values.get(&key)).map(|message| (key, message))
            })
            .collect()
    }

    pub fn count_errors(&self, values: &FormValues) -> usize {
        self.steps
            .iter()
            .map(|step| self.step_errors(&step.name, values).len())
            .sum()
    }

    /// Stores an answer. Sum fields are computed and cannot be assigned.
    pub fn assign(&self, values: &mut FormValues, group: &str, field: &str, value: JsonValue) -> Result<()> {
        let Some((step, definition)) = self.field(group, field) else {
            bail!("{} is not a field of this form", value_key(group, field));
        };
        if definition.sum.is_some() {
            bail!("{} is computed", value_key(group, field));
        }
        values.insert(value_key(group, field), value);
        let step = step.name.clone();
        self.update_sums(values, Some(&step));
        Ok(())
    }

    /// Recomputes sum fields. With `updated_step`, only sums over that step
    /// are refreshed, followed by the sums depending on those.
    pub fn update_sums(&self, values: &mut FormValues, updated_step: Option<&str>) {
        self.update_sums_bounded(values, updated_step, self.steps.len());
    }

    fn update_sums_bounded(&self, values: &mut FormValues, updated_step: Option<&str>, depth: usize) {
        let targets: Vec<(String, String, String)> = self
            .fields()
            .filter_map(|(step, group, field)| {
                let summed = field.sum.as_deref()?;
                self.step(summed)?;
                if updated_step.is_some_and(|u| u != summed) {
                    return None;
                }
                Some((step.name.clone(), value_key(&group.name, &field.name), summed.to_string()))
            })
            .collect();

        for (step, key, summed) in targets {
            let total: i64 = self
                .fields()
                .filter(|(s, _, f)| s.name == summed && f.kind == "number")
                .map(|(_, g, f)| number_of(values.get(&value_key(&g.name, &f.name))))
                .sum();
            values.insert(key, JsonValue::from(total));
            if depth > 0 {
                self.update_sums_bounded(values, Some(&step), depth - 1);
            }
        }
    }

    /// Exported answers of one respondent, keyed by `"{prefix}{export}"`.
    pub fn export(&self, prefix: &str, values: &FormValues) -> Vec<(String, JsonValue)> {
        self.fields()
            .filter_map(|(_, group, field)| {
                let export = field.export.as_deref()?;
                let value = values.get(&value_key(&group.name, &field.name));
                if is_blank_value(value) {
                    return None;
                }
                let value = value.map(|v| field.export_value(v))?;
                Some((format!("{}{}", prefix, export), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluation_form() -> Form {
        Form::from_json(&json!({
            "steps": [
                {"name": "scores", "title": "Puntuación", "groups": [
                    {"name": "impact", "fields": [
                        {"name": "social", "type": "number"},
                        {"name": "local", "type": "number"},
                        {"name": "notes", "type": "text", "optional": true, "limit": 10}
                    ]}
                ]},
                {"name": "summary", "groups": [
                    {"name": "result", "fields": [
                        {"name": "total", "type": "number", "sum": "scores", "export": "total"},
                        {"name": "verdict", "type": "select", "export": "verdict",
                         "collection": {"ok": "Aprobado", "ko": "Rechazado"}},
                        {"name": "terms", "type": "check_boxes", "optional": true, "export": "terms",
                         "collection": {"a": "Uno", "b": "Dos"}}
                    ]}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn required_and_format_errors() {
        let text = |format: Option<&str>, kind: &str| FormField {
            name: "f".to_string(),
            kind: kind.to_string(),
            optional: false,
            format: format.map(str::to_string),
            limit: Some(12),
            sum: None,
            export: None,
            collection: BTreeMap::new(),
        };
        assert_eq!(text(None, "text").error(None).as_deref(), Some("es obligatorio"));
        assert_eq!(text(None, "text").error(Some(&json!("  "))).as_deref(), Some("es obligatorio"));
        assert_eq!(
            text(Some("accept"), "boolean").error(Some(&json!("0"))).as_deref(),
            Some("debe ser aceptado")
        );
        assert_eq!(text(Some("accept"), "boolean").error(Some(&json!("1"))), None);
        assert_eq!(
            text(None, "text").error(Some(&json!("trece letras!"))).as_deref(),
            Some("puede tener hasta 12 caracteres")
        );
        assert_eq!(
            text(Some("dni"), "text").error(Some(&json!("12345678A"))).as_deref(),
            Some("no es un DNI correcto")
        );
        assert_eq!(text(Some("dni"), "text").error(Some(&json!("12345678Z"))), None);
        assert_eq!(
            text(Some("dninie"), "text").error(Some(&json!("X1234567A"))).as_deref(),
            Some("no es un DNI o NIE correcto")
        );
        assert_eq!(
            text(None, "url").error(Some(&json!("ejemplo"))).as_deref(),
            Some("no es una dirección web válida")
        );
        assert_eq!(
            text(None, "email").error(Some(&json!("a@b"))).as_deref(),
            Some("es incorrecto")
        );
    }

    #[test]
    fn sums_follow_assigned_numbers() {
        let form = evaluation_form();
        let mut values = FormValues::new();
        form.assign(&mut values, "impact", "social", json!("4")).unwrap();
        form.assign(&mut values, "impact", "local", json!(3)).unwrap();
        assert_eq!(values.get("result.total"), Some(&json!(7)));

        assert!(form.assign(&mut values, "result", "total", json!(100)).is_err());
        assert!(form.assign(&mut values, "impact", "missing", json!(1)).is_err());
    }

    #[test]
    fn counts_errors_across_steps() {
        let form = evaluation_form();
        let mut values = FormValues::new();
        assert_eq!(form.count_errors(&values), 4);

        form.assign(&mut values, "impact", "social", json!("1")).unwrap();
        form.assign(&mut values, "impact", "local", json!("1")).unwrap();
        form.assign(&mut values, "result", "verdict", json!("ok")).unwrap();
        assert_eq!(form.count_errors(&values), 0);

        form.assign(&mut values, "impact", "notes", json!("demasiado largo")).unwrap();
        assert_eq!(form.step_errors("scores", &values).len(), 1);
    }

    #[test]
    fn export_uses_collection_labels() {
        let form = evaluation_form();
        let mut values = FormValues::new();
        form.assign(&mut values, "impact", "social", json!(2)).unwrap();
        form.assign(&mut values, "result", "verdict", json!("ko")).unwrap();
        form.assign(&mut values, "result", "terms", json!(["", "b"])).unwrap();

        let exported: BTreeMap<String, JsonValue> =
            form.export("evaluation_1_", &values).into_iter().collect();
        assert_eq!(exported.get("evaluation_1_total"), Some(&json!(2)));
        assert_eq!(exported.get("evaluation_1_verdict"), Some(&json!("Rechazado")));
        assert_eq!(exported.get("evaluation_1_terms"), Some(&json!(["Dos"])));
    }
}
