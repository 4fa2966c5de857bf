//! Advisor implementations.

pub mod heuristic;

pub use heuristic::HeuristicAdvisor;
