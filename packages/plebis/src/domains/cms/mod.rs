//! CMS domain - blog categories and posts

pub mod models;

pub use models::category::Category;
pub use models::post::{NewPost, Post};
