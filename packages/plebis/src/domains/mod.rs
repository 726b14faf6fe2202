pub mod branding;
pub mod cms;
pub mod engines;
pub mod gamification;
pub mod impulsa;
pub mod microcredit;
pub mod organizations;
pub mod proposals;
pub mod reports;
pub mod users;
pub mod votes;
