pub mod proposal;
pub mod support;

pub use proposal::*;
pub use support::*;
