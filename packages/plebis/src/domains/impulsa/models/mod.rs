pub mod edition;
pub mod edition_category;
pub mod project;
pub mod project_state;
pub mod state_transition;

pub use edition::*;
pub use edition_category::*;
pub use project::*;
pub use project_state::*;
pub use state_transition::*;
