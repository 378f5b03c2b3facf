//! Strategy layer: the [`strategy::Strategy`] trait, the built-in
//! indicator strategies, and the [`manager::StrategyManager`] that runs them
//! in parallel and combines their signals.

pub mod manager;
pub mod strategies;
pub mod strategy;

pub use manager::{CombinePolicy, StrategyManager};
pub use strategies::build_strategy;
pub use strategy::{Strategy, StrategyError};
