pub mod baseline;
pub mod deadlock;
pub mod engine;
pub mod evaluator;
pub mod navigator;
pub mod processing;
pub mod reachability;
pub mod simulation;
