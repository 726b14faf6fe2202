//! Branding domain - colour themes, per organization overrides and their
//! accessibility checks

pub mod models;
pub mod themes;

pub use models::brand_setting::BrandSetting;
pub use themes::{contrast_ratio, theme, Theme, ThemeColors, THEMES};
