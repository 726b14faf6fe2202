//! Reports domain - stored queries counted by configurable groups
//!
//! A run writes every extracted value to a raw file per group, ranks the
//! files and keeps the biggest names with user and sample breakdowns.

pub mod error;
pub mod models;
pub mod rank;

pub use error::ReportError;
pub use models::report::Report;
pub use models::report_group::{ColumnRule, ReportGroup, TransformationRules};
pub use rank::{RankEntry, ReportResults};
