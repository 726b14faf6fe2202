pub mod badge;
pub mod point;
pub mod user_stats;

pub use badge::*;
pub use point::*;
pub use user_stats::*;
