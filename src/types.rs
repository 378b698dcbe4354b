// =============================================================================
// Shared types used across the Zephyr perp engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Trade direction for signals, orders and positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short. Multiplied into price deltas so PnL
    /// math reads the same for both directions.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Exchange order side that opens a position in this direction.
    pub fn entry_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    /// Exchange order side that reduces a position in this direction.
    pub fn close_side(self) -> &'static str {
        match self {
            Self::Long => "SELL",
            Self::Short => "BUY",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Higher-timeframe trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Lower-timeframe momentum classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MomentumState {
    Momentum,
    Pullback,
    Exhausted,
    Neutral,
}

impl std::fmt::Display for MomentumState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Momentum => write!(f, "MOMENTUM"),
            Self::Pullback => write!(f, "PULLBACK"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Direction of the last observed open-interest change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OiDirection {
    Up,
    Down,
    Flat,
}

impl std::fmt::Display for OiDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

/// Which directions the current funding rate permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingRegime {
    Both,
    LongOnly,
    ShortOnly,
}

impl FundingRegime {
    pub fn allows(self, direction: Direction) -> bool {
        match (self, direction) {
            (Self::Both, _) => true,
            (Self::LongOnly, Direction::Long) => true,
            (Self::ShortOnly, Direction::Short) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for FundingRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Both => write!(f, "BOTH"),
            Self::LongOnly => write!(f, "LONG_ONLY"),
            Self::ShortOnly => write!(f, "SHORT_ONLY"),
        }
    }
}

/// Lifecycle status of a signal as seen by the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Pending,
    Filled,
    Skipped,
    Canceled,
    Failed,
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Filled => write!(f, "FILLED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Current status of a tracked position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a position (or part of it) was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Tp1Hit,
    Tp2Hit,
    SlHit,
    BreakevenTimeout,
    MaxTimeTimeout,
    ExternalClose,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tp1Hit => write!(f, "TP1_HIT"),
            Self::Tp2Hit => write!(f, "TP2_HIT"),
            Self::SlHit => write!(f, "SL_HIT"),
            Self::BreakevenTimeout => write!(f, "BREAKEVEN_TIMEOUT"),
            Self::MaxTimeTimeout => write!(f, "MAX_TIME_TIMEOUT"),
            Self::ExternalClose => write!(f, "EXTERNAL_CLOSE"),
        }
    }
}

/// Top-level engine state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Running,
    Stopped,
    /// The market-data stream was lost after exhausting reconnect attempts.
    /// Existing positions keep being managed; no new entries are taken.
    Degraded,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}
