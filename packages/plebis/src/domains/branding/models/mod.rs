pub mod brand_setting;

pub use brand_setting::*;
