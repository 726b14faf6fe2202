//! Votes domain - elections, their locations and ballots, votes and vote circles
//!
//! The booth election id of a location is the decimal concatenation of the
//! election's `agora_election_id`, the location code and the booth version.

pub mod models;
pub mod territory;

pub use models::election::{Election, ElectionType, NewElection};
pub use models::election_location::{vote_id, ElectionLocation};
pub use models::election_location_question::ElectionLocationQuestion;
pub use models::vote::{Vote, VoteContext};
pub use models::vote_circle::{VoteCircle, VoteCircleKind};
