//! Organizations domain - tenants

pub mod models;

pub use models::organization::Organization;
