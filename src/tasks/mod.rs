pub mod coordinator;
pub mod executor;
pub mod queue;
pub mod rewrite;
pub mod scheduler;
pub mod strategy;
