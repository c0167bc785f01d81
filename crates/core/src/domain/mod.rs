pub mod account;
pub mod actor;
pub mod quote;
pub mod vehicle;
