//! Microcredit domain - loan campaigns, the options lenders choose from and
//! the loans themselves

pub mod models;

pub use models::loan::{LenderData, LoanScope, LoanStats, MicrocreditLoan, NewMicrocreditLoan};
pub use models::microcredit::{Microcredit, NewMicrocredit};
pub use models::option::{MicrocreditOption, NewMicrocreditOption, OptionNode};
