//! Model layer of the plebis civic participation platform.
//!
//! Typed records, validation rules and SQL scopes for elections, proposals,
//! microcredits, Impulsa grant projects, branding, gamification and
//! organizations, plus the vote id calculator and the report rank pipeline.

pub mod common;
pub mod config;
pub mod domains;

pub use config::*;
