//! Proposals domain - citizen proposals, supports and hotness ranking

pub mod models;

pub use models::proposal::{Proposal, ProposalOrder};
pub use models::support::Support;
