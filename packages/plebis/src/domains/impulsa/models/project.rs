use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;

use crate::common::{ImpulsaEditionCategoryId, ImpulsaProjectId, ModelError, UserId, ValidationErrors};
use crate::domains::impulsa::forms::{Form, FormValues};
use crate::domains::users::User;

use super::edition::EditionPhase;
use super::project_state::{Guards, ProjectEvent, ProjectState};
use super::state_transition::ImpulsaProjectStateTransition;

/// Evaluator slots per project, numbered from 1.
pub const EVALUATORS: usize = 2;

/// Project submitted to an Impulsa edition category.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImpulsaProject {
    pub id: ImpulsaProjectId,
    pub impulsa_edition_category_id: ImpulsaEditionCategoryId,
    pub user_id: Option<UserId>,
    pub name: String,
    pub short_description: Option<String>,
    pub total_budget: Option<i32>,
    pub votes: i32,
    pub state: ProjectState,
    pub wizard_step: Option<String>,
    pub wizard_values: Json<FormValues>,
    pub evaluator1_id: Option<UserId>,
    pub evaluator2_id: Option<UserId>,
    pub evaluator1_evaluation: Json<FormValues>,
    pub evaluator2_evaluation: Json<FormValues>,
    pub evaluation_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewImpulsaProject {
    pub impulsa_edition_category_id: ImpulsaEditionCategoryId,
    #[builder(default)]
    pub user_id: Option<UserId>,
    pub name: String,
    #[builder(default)]
    pub short_description: Option<String>,
    #[builder(default)]
    pub total_budget: Option<i32>,
}

impl NewImpulsaProject {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        errors.require_present("name", Some(&self.name));
        errors.require_non_negative("total_budget", self.total_budget.map(i64::from));
        errors
    }
}

// Workflow predicates. Projects here are always stored ones.
impl ImpulsaProject {
    pub fn resigned(&self) -> bool {
        self.state == ProjectState::Resigned
    }

    pub fn editable(&self, phase: EditionPhase) -> bool {
        matches!(
            self.state,
            ProjectState::New | ProjectState::Review | ProjectState::Spam
        ) && phase.allow_edition()
    }

    pub fn fixable(&self, phase: EditionPhase) -> bool {
        self.state == ProjectState::Fixes && phase.allow_fixes()
    }

    pub fn saveable(&self, phase: EditionPhase) -> bool {
        (self.editable(phase) || self.fixable(phase)) && !self.resigned()
    }

    pub fn reviewable(&self) -> bool {
        matches!(self.state, ProjectState::Review | ProjectState::ReviewFixes)
    }

    pub fn deleteable(&self, phase: EditionPhase) -> bool {
        self.editable(phase) && !self.resigned()
    }

    pub fn wizard_has_errors(&self, wizard: &Form) -> bool {
        wizard.count_errors(&self.wizard_values.0) > 0
    }

    pub fn markable_for_review(&self, phase: EditionPhase, wizard: &Form) -> bool {
        !self.resigned()
            && !self.reviewable()
            && self.saveable(phase)
            && !self.wizard_has_errors(wizard)
    }

    pub fn exportable(&self) -> bool {
        self.state.exportable()
    }

    pub fn has_evaluation_result(&self) -> bool {
        self.evaluation_result
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    pub fn guards(&self, phase: EditionPhase, wizard: &Form) -> Guards {
        Guards {
            markable_for_review: self.markable_for_review(phase, wizard),
            evaluation_result: self.has_evaluation_result(),
        }
    }
}

// Evaluation by up to `EVALUATORS` users
impl ImpulsaProject {
    /// User in slot `index`. Out of range slots hold nobody.
    pub fn evaluator(&self, index: usize) -> Option<UserId> {
        match index {
            1 => self.evaluator1_id,
            2 => self.evaluator2_id,
            _ => None,
        }
    }

    /// Assigns slot `index`, refusing a user already sitting in another
    /// slot. Out of range slots are ignored.
    pub fn set_evaluator(&mut self, index: usize, user: Option<UserId>) -> Result<(), ModelError> {
        if let Some(user) = user {
            let elsewhere = (1..=EVALUATORS).any(|i| i != index && self.evaluator(i) == Some(user));
            if elsewhere {
                return Err(ModelError::Refused(
                    "Can't set same user as different evaluators for project.".to_string(),
                ));
            }
        }
        match index {
            1 => self.evaluator1_id = user,
            2 => self.evaluator2_id = user,
            _ => {}
        }
        Ok(())
    }

    /// Slot `user` evaluates in: theirs, or the first free one.
    pub fn current_evaluator(&self, user: UserId) -> Option<usize> {
        (1..=EVALUATORS).find(|&i| match self.evaluator(i) {
            None => true,
            Some(id) => id == user,
        })
    }

    /// Frees the slot of `user` and drops their answers.
    pub fn reset_evaluator(&mut self, user: UserId) -> Result<(), ModelError> {
        let Some(index) = self.current_evaluator(user) else {
            return Ok(());
        };
        self.set_evaluator(index, None)?;
        if let Some(values) = self.evaluation_values_mut(index) {
            values.clear();
        }
        Ok(())
    }

    pub fn evaluation_values(&self, index: usize) -> Option<&FormValues> {
        match index {
            1 => Some(&self.evaluator1_evaluation.0),
            2 => Some(&self.evaluator2_evaluation.0),
            _ => None,
        }
    }

    fn evaluation_values_mut(&mut self, index: usize) -> Option<&mut FormValues> {
        match index {
            1 => Some(&mut self.evaluator1_evaluation.0),
            2 => Some(&mut self.evaluator2_evaluation.0),
            _ => None,
        }
    }

    pub fn assign_evaluation_value(
        &mut self,
        index: usize,
        form: &Form,
        group: &str,
        field: &str,
        value: JsonValue,
    ) -> Result<()> {
        let Some(values) = self.evaluation_values_mut(index) else {
            anyhow::bail!("No evaluator slot {}", index);
        };
        form.assign(values, group, field, value)
    }

    /// Recomputes the sum fields of every assigned evaluator.
    pub fn evaluation_update_formulas(&mut self, form: &Form) {
        for index in 1..=EVALUATORS {
            if self.evaluator(index).is_none() {
                continue;
            }
            if let Some(values) = self.evaluation_values_mut(index) {
                form.update_sums(values, None);
            }
        }
    }

    pub fn evaluation_count_errors(&self, index: usize, form: &Form) -> usize {
        self.evaluation_values(index)
            .map(|values| form.count_errors(values))
            .unwrap_or(0)
    }

    pub fn evaluation_has_errors(&self, form: &Form) -> bool {
        (1..=EVALUATORS).any(|i| self.evaluation_count_errors(i, form) > 0)
    }

    /// Whether `user` may close the evaluation of this project.
    pub fn can_finish_evaluation(&mut self, form: &Form, user: &User) -> bool {
        self.evaluation_update_formulas(form);
        self.state == ProjectState::Validable && !self.evaluation_has_errors(form) && user.admin
    }

    /// Exported answers of every evaluator, as `evaluation_{slot}_{export}`.
    pub fn evaluation_export(&mut self, form: &Form) -> BTreeMap<String, JsonValue> {
        self.evaluation_update_formulas(form);
        (1..=EVALUATORS)
            .filter_map(|i| {
                self.evaluation_values(i)
                    .map(|values| form.export(&format!("evaluation_{}_", i), values))
            })
            .flatten()
            .collect()
    }
}

// =============================================================================
// SQL Queries
// =============================================================================

impl ImpulsaProject {
    pub async fn find_by_id(id: ImpulsaProjectId, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM impulsa_projects WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_for_category(
        category_id: ImpulsaEditionCategoryId,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_projects WHERE impulsa_edition_category_id = $1 ORDER BY created_at",
        )
        .bind(category_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_state(state: ProjectState, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_projects WHERE state = $1 ORDER BY created_at",
        )
        .bind(state)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Validated and winning projects
    pub async fn find_exportable(pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM impulsa_projects WHERE state IN ('validated', 'winner') ORDER BY created_at",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Stores a new project positioned on the first wizard step
    pub async fn create(new: &NewImpulsaProject, wizard: &Form, pool: &PgPool) -> Result<Self> {
        new.validate().into_result()?;
        let first_step = wizard.steps.first().map(|s| s.name.clone());

        let project = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO impulsa_projects (
                id, impulsa_edition_category_id, user_id, name, short_description,
                total_budget, wizard_step
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(ImpulsaProjectId::new())
        .bind(new.impulsa_edition_category_id)
        .bind(new.user_id)
        .bind(&new.name)
        .bind(&new.short_description)
        .bind(new.total_budget)
        .bind(first_step)
        .fetch_one(pool)
        .await?;

        tracing::info!(project_id = %project.id, name = %project.name, "impulsa project created");
        Ok(project)
    }

    pub async fn save_wizard(&self, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE impulsa_projects
            SET wizard_values = $2, wizard_step = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.wizard_values)
        .bind(&self.wizard_step)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn save_evaluation(&self, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE impulsa_projects
            SET evaluator1_id = $2, evaluator2_id = $3,
                evaluator1_evaluation = $4, evaluator2_evaluation = $5,
                evaluation_result = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.evaluator1_id)
        .bind(self.evaluator2_id)
        .bind(&self.evaluator1_evaluation)
        .bind(&self.evaluator2_evaluation)
        .bind(&self.evaluation_result)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// Fires `event`, storing the new state and its audit row together.
    pub async fn fire(
        &mut self,
        event: ProjectEvent,
        phase: EditionPhase,
        wizard: &Form,
        pool: &PgPool,
    ) -> Result<ImpulsaProjectStateTransition> {
        let from = self.state;
        let to = event.transition(from, self.guards(phase, wizard))?;

        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE impulsa_projects SET state = $2, updated_at = NOW() WHERE id = $1")
            .bind(self.id)
            .bind(to)
            .execute(&mut *tx)
            .await?;
        let transition =
            ImpulsaProjectStateTransition::record(&mut tx, self.id, event, from, to).await?;
        tx.commit().await?;

        self.state = to;
        tracing::info!(
            project_id = %self.id,
            event = %event,
            from = %from,
            to = %to,
            "impulsa project transitioned"
        );
        Ok(transition)
    }

    pub async fn delete(&self, phase: EditionPhase, pool: &PgPool) -> Result<()> {
        if !self.deleteable(phase) {
            return Err(ModelError::Refused(format!(
                "project in state {} cannot be deleted",
                self.state
            ))
            .into());
        }
        sqlx::query("DELETE FROM impulsa_projects WHERE id = $1")
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::impulsa::models::test_support::project;
    use crate::domains::votes::models::test_support::user;
    use serde_json::json;

    fn wizard() -> Form {
        Form::from_json(&json!({"steps": [{"name": "step1", "groups": [
            {"name": "group1", "fields": [{"name": "field1", "type": "text"}]}
        ]}]}))
        .unwrap()
    }

    fn evaluation() -> Form {
        Form::from_json(&json!({"steps": [
            {"name": "scores", "groups": [{"name": "g", "fields": [
                {"name": "a", "type": "number", "export": "a"},
                {"name": "b", "type": "number"}
            ]}]},
            {"name": "total", "groups": [{"name": "t", "fields": [
                {"name": "sum", "type": "number", "sum": "scores", "export": "total"}
            ]}]}
        ]}))
        .unwrap()
    }

    fn filled(state: ProjectState) -> ImpulsaProject {
        let mut p = project(state);
        p.wizard_values.0.insert("group1.field1".to_string(), json!("value"));
        p
    }

    #[test]
    fn editable_while_edition_allows_it() {
        for state in [ProjectState::New, ProjectState::Review, ProjectState::Spam] {
            assert!(project(state).editable(EditionPhase::NewProjects));
            assert!(!project(state).editable(EditionPhase::Votings));
        }
        for state in [
            ProjectState::Fixes,
            ProjectState::ReviewFixes,
            ProjectState::Validable,
            ProjectState::Validated,
            ProjectState::Invalidated,
            ProjectState::Winner,
            ProjectState::Resigned,
        ] {
            assert!(!project(state).editable(EditionPhase::NewProjects));
        }
    }

    #[test]
    fn fixes_are_saveable_until_validation() {
        let p = project(ProjectState::Fixes);
        assert!(p.fixable(EditionPhase::ReviewProjects));
        assert!(p.saveable(EditionPhase::ReviewProjects));
        assert!(!p.fixable(EditionPhase::ValidationProjects));
        assert!(!project(ProjectState::Review).fixable(EditionPhase::ReviewProjects));
        assert!(!project(ProjectState::Resigned).saveable(EditionPhase::NewProjects));
        assert!(!project(ProjectState::Validable).saveable(EditionPhase::Votings));
    }

    #[test]
    fn markable_for_review_needs_a_complete_wizard() {
        let phase = EditionPhase::NewProjects;
        assert!(filled(ProjectState::New).markable_for_review(phase, &wizard()));
        assert!(filled(ProjectState::Spam).markable_for_review(phase, &wizard()));
        assert!(filled(ProjectState::Fixes).markable_for_review(EditionPhase::ReviewProjects, &wizard()));
        assert!(!project(ProjectState::New).markable_for_review(phase, &wizard()));
        assert!(!filled(ProjectState::Review).markable_for_review(phase, &wizard()));
        assert!(!filled(ProjectState::Resigned).markable_for_review(phase, &wizard()));
    }

    #[test]
    fn reviewable_and_deleteable() {
        assert!(project(ProjectState::Review).reviewable());
        assert!(project(ProjectState::ReviewFixes).reviewable());
        assert!(!project(ProjectState::New).reviewable());

        assert!(project(ProjectState::Spam).deleteable(EditionPhase::NewProjects));
        assert!(!project(ProjectState::Validable).deleteable(EditionPhase::NewProjects));
    }

    #[test]
    fn guards_drive_transitions() {
        let p = project(ProjectState::New);
        let err = ProjectEvent::MarkForReview
            .transition(p.state, p.guards(EditionPhase::NewProjects, &wizard()));
        assert!(err.is_err());

        let mut p = project(ProjectState::Validable);
        assert!(!p.guards(EditionPhase::Votings, &wizard()).evaluation_result);
        p.evaluation_result = Some("ok".to_string());
        assert!(p.guards(EditionPhase::Votings, &wizard()).evaluation_result);
    }

    #[test]
    fn evaluator_slots_refuse_duplicates() {
        let mut p = project(ProjectState::Validable);
        let ana = UserId::new();
        let luis = UserId::new();

        p.set_evaluator(1, Some(ana)).unwrap();
        assert!(p.set_evaluator(2, Some(ana)).is_err());
        p.set_evaluator(2, Some(luis)).unwrap();
        p.set_evaluator(3, Some(UserId::new())).unwrap();
        assert_eq!(p.evaluator(3), None);
        assert_eq!(p.evaluator(0), None);

        assert_eq!(p.current_evaluator(luis), Some(2));
        assert_eq!(p.current_evaluator(UserId::new()), None);
    }

    #[test]
    fn reset_evaluator_clears_answers() {
        let form = evaluation();
        let mut p = project(ProjectState::Validable);
        let ana = UserId::new();
        p.set_evaluator(1, Some(ana)).unwrap();
        p.assign_evaluation_value(1, &form, "g", "a", json!(3)).unwrap();
        assert!(!p.evaluation_values(1).unwrap().is_empty());

        p.reset_evaluator(ana).unwrap();
        assert_eq!(p.evaluator(1), None);
        assert!(p.evaluation_values(1).unwrap().is_empty());
    }

    #[test]
    fn finishing_an_evaluation() {
        let form = evaluation();
        let mut admin = user(None);
        admin.admin = true;
        let mut p = project(ProjectState::Validable);

        p.set_evaluator(1, Some(UserId::new())).unwrap();
        p.set_evaluator(2, Some(UserId::new())).unwrap();
        for i in 1..=EVALUATORS {
            p.assign_evaluation_value(i, &form, "g", "a", json!(2)).unwrap();
        }
        assert!(!p.can_finish_evaluation(&form, &admin));

        for i in 1..=EVALUATORS {
            p.assign_evaluation_value(i, &form, "g", "b", json!("5")).unwrap();
        }
        assert!(p.can_finish_evaluation(&form, &admin));
        assert!(!p.can_finish_evaluation(&form, &user(None)));

        let export = p.evaluation_export(&form);
        assert_eq!(export.get("evaluation_1_total"), Some(&json!(7)));
        assert_eq!(export.get("evaluation_2_a"), Some(&json!(2)));

        p.state = ProjectState::Validated;
        assert!(!p.can_finish_evaluation(&form, &admin));
        assert!(p.exportable());
    }
}
