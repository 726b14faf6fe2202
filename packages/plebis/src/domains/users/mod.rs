//! Users domain - platform members, confirmation state, voting location
//! and sign-up spam filters

pub mod models;

pub use models::spam_filter::{NewSpamFilter, SpamFilter};
pub use models::user::{DocumentType, NewUser, User};
