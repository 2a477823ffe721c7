pub mod types;
pub mod error;
pub mod market_data;
pub mod spread_monitor;
pub mod evaluator;
pub mod execution;
pub mod delta_tracker;
pub mod recovery;
pub mod controller;
pub mod paper_backend;

#[cfg(test)]
mod tests;
