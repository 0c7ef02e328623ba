pub mod accumulator;
pub mod engine;
pub mod milestones;
pub mod persistence;
pub mod registry;
pub mod scheduler;
