pub mod engine_activation;

pub use engine_activation::*;
