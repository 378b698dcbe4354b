// =============================================================================
// Engine Configuration — serde-defaulted settings with atomic save
// =============================================================================
//
// Every tunable parameter of the engine lives here, grouped by concern
// (risk / filters / orders / lifecycle). All fields carry `#[serde(default)]`
// so adding new fields never breaks loading an older config file.
//
// Persistence uses the tmp + rename pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
        "DOGEUSDT".to_string(),
    ]
}

fn default_ltf_interval() -> String {
    "1m".to_string()
}

fn default_stream_url() -> String {
    "wss://fstream.binance.com/ws".to_string()
}

fn default_htf_interval() -> String {
    "5m".to_string()
}

fn default_max_positions() -> usize {
    3
}

fn default_max_same_direction() -> usize {
    2
}

fn default_max_daily_loss() -> f64 {
    0.05
}

fn default_consecutive_loss_limit() -> u32 {
    3
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_fixed_margin_usdt() -> f64 {
    50.0
}

fn default_leverage() -> u32 {
    5
}

fn default_max_spread_pct() -> f64 {
    0.0005
}

fn default_funding_max_for_long() -> f64 {
    0.0003
}

fn default_funding_min_for_short() -> f64 {
    -0.0003
}

fn default_funding_extreme_high() -> f64 {
    0.0005
}

fn default_funding_extreme_low() -> f64 {
    -0.0005
}

fn default_trend_bars() -> usize {
    4
}

fn default_momentum_bars() -> usize {
    5
}

fn default_body_exhausted() -> f64 {
    0.5
}

fn default_body_momentum() -> f64 {
    1.2
}

fn default_momentum_body_cap() -> f64 {
    1.5
}

fn default_volume_decrease() -> f64 {
    0.7
}

fn default_min_cvd_ratio() -> f64 {
    0.12
}

fn default_cvd_bars() -> usize {
    3
}

fn default_atr_period() -> usize {
    14
}

fn default_entry_offset_atr() -> f64 {
    0.15
}

fn default_tp_atr() -> f64 {
    1.5
}

fn default_tp1_atr() -> f64 {
    1.0
}

fn default_tp2_atr() -> f64 {
    2.0
}

fn default_sl_atr() -> f64 {
    1.2
}

fn default_min_atr_pct() -> f64 {
    0.0008
}

fn default_min_tp_sl_pct() -> f64 {
    0.003
}

fn default_fee_pct() -> f64 {
    0.0004
}

fn default_slippage_pct() -> f64 {
    0.0003
}

fn default_unfill_timeout_sec() -> i64 {
    60
}

fn default_tp_reduce_time_sec() -> i64 {
    900
}

fn default_tp_reduce_ratio() -> f64 {
    0.5
}

fn default_breakeven_time_sec() -> i64 {
    1800
}

fn default_breakeven_min_profit() -> f64 {
    -0.001
}

fn default_max_hold_time_sec() -> i64 {
    3600
}

// =============================================================================
// Config groups
// =============================================================================

/// Risk policy limits enforced before every entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum open positions + pending orders across all symbols.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Maximum positions in the same direction.
    #[serde(default = "default_max_same_direction")]
    pub max_same_direction: usize,

    /// Maximum cumulative daily loss as a fraction (0.05 = 5 %).
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Consecutive losing trades before the cooldown engages.
    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    /// Duration of the consecutive-loss cooldown.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,

    /// Fixed margin committed per trade in USDT.
    #[serde(default = "default_fixed_margin_usdt")]
    pub fixed_margin_usdt: f64,

    /// Leverage applied to every position.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            max_same_direction: default_max_same_direction(),
            max_daily_loss: default_max_daily_loss(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            cooldown_minutes: default_cooldown_minutes(),
            fixed_margin_usdt: default_fixed_margin_usdt(),
            leverage: default_leverage(),
        }
    }
}

/// Thresholds for the F1/F2/F3 scan cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Maximum acceptable bid/ask spread as a fraction of mid.
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: f64,

    /// Reject longs when funding exceeds this rate.
    #[serde(default = "default_funding_max_for_long")]
    pub funding_max_for_long: f64,

    /// Reject shorts when funding is below this rate.
    #[serde(default = "default_funding_min_for_short")]
    pub funding_min_for_short: f64,

    /// Above this rate only shorts are considered.
    #[serde(default = "default_funding_extreme_high")]
    pub funding_extreme_high: f64,

    /// Below this rate only longs are considered.
    #[serde(default = "default_funding_extreme_low")]
    pub funding_extreme_low: f64,

    /// HTF window length for trend classification.
    #[serde(default = "default_trend_bars")]
    pub trend_bars: usize,

    /// LTF window length for momentum classification.
    #[serde(default = "default_momentum_bars")]
    pub momentum_bars: usize,

    /// Body-size ratio below which momentum counts as exhausted.
    #[serde(default = "default_body_exhausted")]
    pub body_exhausted: f64,

    /// Body-size ratio above which the last bar counts as a momentum bar.
    #[serde(default = "default_body_momentum")]
    pub body_momentum: f64,

    /// MOMENTUM-state entries are only accepted below this body-size ratio.
    #[serde(default = "default_momentum_body_cap")]
    pub momentum_body_cap: f64,

    /// Volume ratio below which volume counts as decreasing.
    #[serde(default = "default_volume_decrease")]
    pub volume_decrease: f64,

    /// Minimum |cvd| / total volume over the CVD window.
    #[serde(default = "default_min_cvd_ratio")]
    pub min_cvd_ratio: f64,

    /// Number of LTF bars in the CVD window.
    #[serde(default = "default_cvd_bars")]
    pub cvd_bars: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_spread_pct: default_max_spread_pct(),
            funding_max_for_long: default_funding_max_for_long(),
            funding_min_for_short: default_funding_min_for_short(),
            funding_extreme_high: default_funding_extreme_high(),
            funding_extreme_low: default_funding_extreme_low(),
            trend_bars: default_trend_bars(),
            momentum_bars: default_momentum_bars(),
            body_exhausted: default_body_exhausted(),
            body_momentum: default_body_momentum(),
            momentum_body_cap: default_momentum_body_cap(),
            volume_decrease: default_volume_decrease(),
            min_cvd_ratio: default_min_cvd_ratio(),
            cvd_bars: default_cvd_bars(),
        }
    }
}

/// Entry and target sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// ATR look-back period.
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Maker-bias entry offset in ATR multiples (subtracted for longs,
    /// added for shorts).
    #[serde(default = "default_entry_offset_atr")]
    pub entry_offset_atr: f64,

    /// Single-TP fallback distance in ATR multiples.
    #[serde(default = "default_tp_atr")]
    pub tp_atr: f64,

    /// TP1 distance in ATR multiples.
    #[serde(default = "default_tp1_atr")]
    pub tp1_atr: f64,

    /// TP2 distance in ATR multiples.
    #[serde(default = "default_tp2_atr")]
    pub tp2_atr: f64,

    /// SL distance in ATR multiples.
    #[serde(default = "default_sl_atr")]
    pub sl_atr: f64,

    /// Minimum ATR as a fraction of price; rejects dead markets.
    #[serde(default = "default_min_atr_pct")]
    pub min_atr_pct: f64,

    /// Floor for TP/SL distances as a fraction of entry, before cost floors.
    #[serde(default = "default_min_tp_sl_pct")]
    pub min_tp_sl_pct: f64,

    /// Taker fee per side as a fraction.
    #[serde(default = "default_fee_pct")]
    pub fee_pct: f64,

    /// Expected slippage as a fraction.
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,

    /// Seconds before an unfilled limit entry is cancelled.
    #[serde(default = "default_unfill_timeout_sec")]
    pub unfill_timeout_sec: i64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            entry_offset_atr: default_entry_offset_atr(),
            tp_atr: default_tp_atr(),
            tp1_atr: default_tp1_atr(),
            tp2_atr: default_tp2_atr(),
            sl_atr: default_sl_atr(),
            min_atr_pct: default_min_atr_pct(),
            min_tp_sl_pct: default_min_tp_sl_pct(),
            fee_pct: default_fee_pct(),
            slippage_pct: default_slippage_pct(),
            unfill_timeout_sec: default_unfill_timeout_sec(),
        }
    }
}

/// Time-based position lifecycle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// After this many seconds the TP is pulled closer.
    #[serde(default = "default_tp_reduce_time_sec")]
    pub tp_reduce_time_sec: i64,

    /// Reduced TP distance as a fraction of the original distance.
    #[serde(default = "default_tp_reduce_ratio")]
    pub tp_reduce_ratio: f64,

    /// After this many seconds near-flat positions are closed.
    #[serde(default = "default_breakeven_time_sec")]
    pub breakeven_time_sec: i64,

    /// Minimum pnl fraction required for the breakeven close.
    #[serde(default = "default_breakeven_min_profit")]
    pub breakeven_min_profit: f64,

    /// Absolute hold cap; non-losing positions are closed here, losing
    /// positions are left for the stop-loss.
    #[serde(default = "default_max_hold_time_sec")]
    pub max_hold_time_sec: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tp_reduce_time_sec: default_tp_reduce_time_sec(),
            tp_reduce_ratio: default_tp_reduce_ratio(),
            breakeven_time_sec: default_breakeven_time_sec(),
            breakeven_min_profit: default_breakeven_min_profit(),
            max_hold_time_sec: default_max_hold_time_sec(),
        }
    }
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Zephyr engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Watchlist the engine scans and trades.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Lower timeframe driving the momentum / CVD filters.
    #[serde(default = "default_ltf_interval")]
    pub ltf_interval: String,

    /// Higher timeframe driving the trend filter.
    #[serde(default = "default_htf_interval")]
    pub htf_interval: String,

    /// Public WebSocket endpoint for the market stream.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub orders: OrderConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            ltf_interval: default_ltf_interval(),
            htf_interval: default_htf_interval(),
            stream_url: default_stream_url(),
            risk: RiskConfig::default(),
            filters: FilterConfig::default(),
            orders: OrderConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error when the file is missing or malformed so the caller
    /// can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            ltf = %config.ltf_interval,
            htf = %config.htf_interval,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Round-trip cost floor for TP/SL distances as a fraction of entry:
    /// both fee legs, both spread legs, plus expected slippage.
    pub fn min_target_pct(&self, spread_pct: f64) -> f64 {
        let costs = 2.0 * self.orders.fee_pct + 2.0 * spread_pct + self.orders.slippage_pct;
        self.orders.min_tp_sl_pct.max(costs)
    }
}
