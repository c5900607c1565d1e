pub mod audit;
pub mod auth;
pub mod candidate;
pub mod election;
pub mod notification;
pub mod pagination;
pub mod position;
pub mod results;
pub mod role;
pub mod vote;
pub mod voting_token;
