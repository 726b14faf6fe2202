//! Impulsa domain - yearly project calls, their review workflow and the
//! forms projects are filled in and evaluated with

pub mod forms;
pub mod models;

pub use forms::{Form, FormValues};
pub use models::edition::{EditionPhase, ImpulsaEdition, NewImpulsaEdition};
pub use models::edition_category::{CategoryType, ImpulsaEditionCategory};
pub use models::project::{ImpulsaProject, NewImpulsaProject, EVALUATORS};
pub use models::project_state::{ProjectEvent, ProjectState, TransitionError};
pub use models::state_transition::ImpulsaProjectStateTransition;
