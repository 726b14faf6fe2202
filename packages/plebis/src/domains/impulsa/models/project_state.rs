//! Review workflow of Impulsa projects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "impulsa_project_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    #[default]
    New,
    Review,
    Spam,
    Fixes,
    ReviewFixes,
    Validable,
    Validated,
    Invalidated,
    Winner,
    Resigned,
}

impl ProjectState {
    pub const ALL: [ProjectState; 10] = [
        Self::New,
        Self::Review,
        Self::Spam,
        Self::Fixes,
        Self::ReviewFixes,
        Self::Validable,
        Self::Validated,
        Self::Invalidated,
        Self::Winner,
        Self::Resigned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Review => "review",
            Self::Spam => "spam",
            Self::Fixes => "fixes",
            Self::ReviewFixes => "review_fixes",
            Self::Validable => "validable",
            Self::Validated => "validated",
            Self::Invalidated => "invalidated",
            Self::Winner => "winner",
            Self::Resigned => "resigned",
        }
    }

    /// Shown in exports and public listings
    pub fn exportable(self) -> bool {
        matches!(self, Self::Validated | Self::Winner)
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid project state: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectEvent {
    MarkAsSpam,
    MarkForReview,
    MarkAsFixes,
    MarkAsValidable,
    MarkAsValidated,
    MarkAsInvalidated,
    MarkAsWinner,
    MarkAsResigned,
}

impl ProjectEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkAsSpam => "mark_as_spam",
            Self::MarkForReview => "mark_for_review",
            Self::MarkAsFixes => "mark_as_fixes",
            Self::MarkAsValidable => "mark_as_validable",
            Self::MarkAsValidated => "mark_as_validated",
            Self::MarkAsInvalidated => "mark_as_invalidated",
            Self::MarkAsWinner => "mark_as_winner",
            Self::MarkAsResigned => "mark_as_resigned",
        }
    }

    /// State reached when firing from `from`, or an error when the event
    /// does not apply or its guard fails.
    pub fn transition(self, from: ProjectState, guards: Guards) -> Result<ProjectState, TransitionError> {
        use ProjectState::*;

        let to = match (self, from) {
            (Self::MarkAsSpam, _) => Spam,
            (Self::MarkAsResigned, _) => Resigned,
            (Self::MarkForReview, New | Spam) => Review,
            (Self::MarkForReview, Fixes) => ReviewFixes,
            (Self::MarkAsFixes, Review | ReviewFixes) => Fixes,
            (Self::MarkAsValidable, Review | ReviewFixes) => Validable,
            (Self::MarkAsValidated, Validable) => Validated,
            (Self::MarkAsInvalidated, Validable) => Invalidated,
            (Self::MarkAsWinner, Validated) => Winner,
            _ => return Err(TransitionError::NotAllowed { event: self, from }),
        };

        match self {
            Self::MarkForReview if !guards.markable_for_review => Err(TransitionError::GuardFailed {
                event: self,
                guard: "markable_for_review",
            }),
            Self::MarkAsValidated | Self::MarkAsInvalidated if !guards.evaluation_result => {
                Err(TransitionError::GuardFailed {
                    event: self,
                    guard: "evaluation_result",
                })
            }
            _ => Ok(to),
        }
    }
}

impl fmt::Display for ProjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::MarkAsSpam,
            Self::MarkForReview,
            Self::MarkAsFixes,
            Self::MarkAsValidable,
            Self::MarkAsValidated,
            Self::MarkAsInvalidated,
            Self::MarkAsWinner,
            Self::MarkAsResigned,
        ]
        .into_iter()
        .find(|event| event.as_str() == s)
        .ok_or_else(|| anyhow::anyhow!("Invalid project event: {}", s))
    }
}

/// Conditions some transitions depend on, evaluated by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Guards {
    pub markable_for_review: bool,
    pub evaluation_result: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {event} from state {from}")]
    NotAllowed { event: ProjectEvent, from: ProjectState },

    #[error("cannot {event}: {guard} does not hold")]
    GuardFailed { event: ProjectEvent, guard: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProjectState::*;

    const OPEN: Guards = Guards {
        markable_for_review: true,
        evaluation_result: true,
    };

    #[test]
    fn spam_and_resign_apply_from_any_state() {
        for state in ProjectState::ALL {
            assert_eq!(ProjectEvent::MarkAsSpam.transition(state, Guards::default()), Ok(Spam));
            assert_eq!(
                ProjectEvent::MarkAsResigned.transition(state, Guards::default()),
                Ok(Resigned)
            );
        }
    }

    #[test]
    fn review_goes_through_fixes() {
        let review = ProjectEvent::MarkForReview;
        assert_eq!(review.transition(New, OPEN), Ok(Review));
        assert_eq!(review.transition(Spam, OPEN), Ok(Review));
        assert_eq!(review.transition(Fixes, OPEN), Ok(ReviewFixes));
        assert!(matches!(
            review.transition(Resigned, OPEN),
            Err(TransitionError::NotAllowed { .. })
        ));
        assert!(matches!(
            review.transition(New, Guards::default()),
            Err(TransitionError::GuardFailed { guard: "markable_for_review", .. })
        ));

        assert_eq!(ProjectEvent::MarkAsFixes.transition(Review, OPEN), Ok(Fixes));
        assert_eq!(ProjectEvent::MarkAsFixes.transition(ReviewFixes, OPEN), Ok(Fixes));
        assert!(ProjectEvent::MarkAsFixes.transition(New, OPEN).is_err());

        assert_eq!(ProjectEvent::MarkAsValidable.transition(Review, OPEN), Ok(Validable));
        assert_eq!(ProjectEvent::MarkAsValidable.transition(ReviewFixes, OPEN), Ok(Validable));
        assert!(ProjectEvent::MarkAsValidable.transition(Fixes, OPEN).is_err());
    }

    #[test]
    fn validation_needs_an_evaluation_result() {
        let without = Guards {
            markable_for_review: true,
            evaluation_result: false,
        };
        assert_eq!(ProjectEvent::MarkAsValidated.transition(Validable, OPEN), Ok(Validated));
        assert_eq!(ProjectEvent::MarkAsInvalidated.transition(Validable, OPEN), Ok(Invalidated));
        assert!(ProjectEvent::MarkAsValidated.transition(Validable, without).is_err());
        assert!(ProjectEvent::MarkAsInvalidated.transition(Validable, without).is_err());
        assert!(ProjectEvent::MarkAsValidated.transition(Review, OPEN).is_err());
    }

    #[test]
    fn only_validated_projects_win() {
        assert_eq!(ProjectEvent::MarkAsWinner.transition(Validated, OPEN), Ok(Winner));
        for state in [New, Review, Validable, Invalidated, Resigned] {
            assert!(ProjectEvent::MarkAsWinner.transition(state, OPEN).is_err());
        }
    }

    #[test]
    fn exportable_states() {
        let exportable: Vec<_> = ProjectState::ALL.into_iter().filter(|s| s.exportable()).collect();
        assert_eq!(exportable, vec![Validated, Winner]);
    }

    #[test]
    fn names_parse_back() {
        for state in ProjectState::ALL {
            assert_eq!(state.as_str().parse::<ProjectState>().unwrap(), state);
        }
        assert_eq!(
            "mark_for_review".parse::<ProjectEvent>().unwrap(),
            ProjectEvent::MarkForReview
        );
        assert_eq!(
            TransitionError::NotAllowed { event: ProjectEvent::MarkAsWinner, from: New }.to_string(),
            "cannot mark_as_winner from state new"
        );
    }
}
