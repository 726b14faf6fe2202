pub mod category;
pub mod post;

pub use category::*;
pub use post::*;
