/// Multi-account operation cycles: pipelines of dependent router calls and the scheduler that
/// runs them for each account.
pub mod config;
pub mod operations;
pub mod pipeline;
pub mod scheduler;
pub mod strategy;
