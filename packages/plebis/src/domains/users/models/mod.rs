pub mod spam_filter;
pub mod user;

pub use spam_filter::{NewSpamFilter, SpamFilter};
pub use user::*;
