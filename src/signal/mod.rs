// =============================================================================
// Signal plane — scan cascade, scored signals, pluggable strategies
// =============================================================================

pub mod engine;
pub mod strategy;
pub mod types;

pub use engine::SignalEngine;
pub use strategy::{OrbStrategy, Strategy, StrategyIntake};
pub use types::{Signal, SIGNAL_TTL_SECS};
