// Common types and utilities shared across the domains

pub mod entity_ids;
pub mod id;
pub mod utils;
pub mod validation;

pub use entity_ids::*;
pub use id::Id;
pub use validation::{is_blank, ModelError, ValidationErrors};
