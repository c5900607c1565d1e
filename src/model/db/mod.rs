pub mod audit;
pub mod candidate;
pub mod election;
pub mod notification;
pub mod organization;
pub mod position;
pub mod role;
pub mod user;
pub mod vote;
pub mod voting_token;
