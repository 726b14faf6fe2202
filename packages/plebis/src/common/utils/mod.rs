pub mod email;
pub mod iban;
pub mod slug;
pub mod spanish_vat;
pub mod tokens;

pub use email::*;
pub use iban::*;
pub use slug::*;
pub use spanish_vat::*;
pub use tokens::*;
