pub mod report;
pub mod report_group;

pub use report::*;
pub use report_group::*;
