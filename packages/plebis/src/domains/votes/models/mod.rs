pub mod election;
pub mod election_location;
pub mod election_location_question;
pub mod vote;
pub mod vote_circle;

pub use election::*;
pub use election_location::*;
pub use election_location_question::*;
pub use vote::*;
pub use vote_circle::*;
