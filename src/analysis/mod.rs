// =============================================================================
// Window analyzers — HTF trend and LTF momentum classification
// =============================================================================

pub mod momentum;
pub mod trend;

pub use momentum::{analyze_momentum, MomentumAnalysis};
pub use trend::{analyze_trend, TrendAnalysis};
