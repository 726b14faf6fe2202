pub mod loan;
pub mod microcredit;
pub mod option;

pub use loan::*;
pub use microcredit::*;
pub use option::*;
