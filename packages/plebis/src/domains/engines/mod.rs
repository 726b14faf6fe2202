//! Engines domain - optional feature modules, their dependencies and which
//! of them are switched on

pub mod models;
pub mod registry;

pub use models::engine_activation::EngineActivation;
pub use registry::{EngineInfo, ENGINES};
