// =============================================================================
// SignalEngine — the once-a-minute scan cascade
// =============================================================================
//
// Aligned to second 30 (after the aux poller's :00 refresh). Each cycle walks
// the watchlist sequentially, runs the F1 → F2 → F3 cascade per symbol,
// scores the survivors, and replaces the active-signal snapshot sorted by
// strength. Strategies (the ORB variant) feed the same snapshot through
// `push_external`.
//
// A symbol failing any gate is logged with its rejection and skipped — a
// data gap is a soft reject for that symbol only, never an error.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::analysis::{analyze_momentum, analyze_trend};
use crate::config::BotConfig;
use crate::indicators::atr::atr_or_range_mean;
use crate::indicators::cvd::cvd_with_ratio;
use crate::market_data::{CandleKey, MarketDataStore};
use crate::sched::align_to_minute_second;
use crate::types::{Direction, FundingRegime, MomentumState, OiDirection, TrendDirection};

use super::Signal;

/// Minimum closed bars before a symbol is scanned at all.
const MIN_LTF_BARS: usize = 10;
/// Scan alignment inside the minute.
const SCAN_SECOND: u32 = 30;

// ---------------------------------------------------------------------------
// Rejection reasons (logged, and asserted on in tests)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Reject {
    ShortHistory,
    NoSpread,
    SpreadTooWide,
    TrendNeutral,
    MomentumState(MomentumState),
    MomentumBodyCap,
    DirectionMismatch,
    CvdSignMismatch,
    CvdTooWeak,
    FundingRegime,
    FundingRecheck,
    AtrTooLow,
    NoVolume,
}

impl std::fmt::Display for Reject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortHistory => write!(f, "insufficient candles"),
            Self::NoSpread => write!(f, "no spread quote"),
            Self::SpreadTooWide => write!(f, "spread too wide"),
            Self::TrendNeutral => write!(f, "trend neutral"),
            Self::MomentumState(s) => write!(f, "momentum state {s}"),
            Self::MomentumBodyCap => write!(f, "momentum body above cap"),
            Self::DirectionMismatch => write!(f, "trend/momentum direction mismatch"),
            Self::CvdSignMismatch => write!(f, "cvd sign mismatch"),
            Self::CvdTooWeak => write!(f, "cvd ratio below minimum"),
            Self::FundingRegime => write!(f, "funding regime excludes direction"),
            Self::FundingRecheck => write!(f, "funding rate unfavourable"),
            Self::AtrTooLow => write!(f, "atr below minimum"),
            Self::NoVolume => write!(f, "no volume in cvd window"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SignalEngine {
    store: Arc<MarketDataStore>,
    config: Arc<BotConfig>,
    watchlist: Arc<RwLock<Vec<String>>>,
    active: RwLock<Vec<Signal>>,
}

impl SignalEngine {
    pub fn new(
        store: Arc<MarketDataStore>,
        config: Arc<BotConfig>,
        watchlist: Arc<RwLock<Vec<String>>>,
    ) -> Self {
        Self {
            store,
            config,
            watchlist,
            active: RwLock::new(Vec::new()),
        }
    }

    /// Run aligned to second 30 of every minute until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        align_to_minute_second(SCAN_SECOND).await;
        info!("signal scanner aligned to :30");

        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan_for_signals();
                }
                _ = shutdown.changed() => {
                    info!("signal scanner stopped");
                    return;
                }
            }
        }
    }

    /// One full scan: analyze every watchlist symbol, sort passers by
    /// strength (descending) and replace the active snapshot. Returns the
    /// number of active signals after the scan.
    pub fn scan_for_signals(&self) -> usize {
        let symbols = self.watchlist.read().clone();
        let now = Utc::now();

        let mut passed: Vec<Signal> = Vec::new();
        for symbol in &symbols {
            match self.analyze_symbol(symbol) {
                Ok(signal) => {
                    info!(
                        symbol,
                        direction = %signal.direction,
                        strength = signal.strength,
                        entry = signal.entry_price,
                        "signal emitted"
                    );
                    passed.push(signal);
                }
                Err(reject) => {
                    debug!(symbol, reason = %reject, "symbol rejected");
                }
            }
        }

        passed.sort_by(|a, b| b.strength.total_cmp(&a.strength));

        let mut active = self.active.write();
        // Keep unexpired externally-pushed signals; scanner output replaces
        // the previous scan wholesale.
        active.retain(|s| !s.is_expired(now) && s.external);
        active.extend(passed);
        active.len()
    }

    /// Strategy intake: external signals share the snapshot and TTL rules.
    pub fn push_external(&self, signal: Signal) {
        self.active.write().push(signal);
    }

    /// Snapshot for the status API.
    pub fn active_signals(&self) -> Vec<Signal> {
        let now = Utc::now();
        self.active
            .read()
            .iter()
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect()
    }

    /// Drain the snapshot for the coordinator — each signal is consumed at
    /// most once; expired entries are silently dropped here.
    pub fn take_signals(&self) -> Vec<Signal> {
        let now = Utc::now();
        let mut active = self.active.write();
        active.drain(..).filter(|s| !s.is_expired(now)).collect()
    }

    // -------------------------------------------------------------------------
    // The cascade
    // -------------------------------------------------------------------------

    fn analyze_symbol(&self, symbol: &str) -> Result<Signal, Reject> {
        let filters = &self.config.filters;
        let orders = &self.config.orders;

        // ── Step 1: load ────────────────────────────────────────────────
        let ltf_key = CandleKey::new(symbol, &self.config.ltf_interval);
        let htf_key = CandleKey::new(symbol, &self.config.htf_interval);

        let ltf = self.store.window(&ltf_key, 50);
        let htf = self.store.window(&htf_key, 10);
        if ltf.len() < MIN_LTF_BARS.max(filters.momentum_bars) || htf.len() < filters.trend_bars {
            return Err(Reject::ShortHistory);
        }

        // ── Step 2: F1 macro ────────────────────────────────────────────
        let spread = self.store.spread(symbol).ok_or(Reject::NoSpread)?;
        if spread.spread_pct > filters.max_spread_pct {
            return Err(Reject::SpreadTooWide);
        }
        // Funding may be absent; absent reads as zero.
        let funding_rate = self.store.funding(symbol).map(|f| f.rate).unwrap_or(0.0);
        let regime = if funding_rate > filters.funding_extreme_high {
            FundingRegime::ShortOnly
        } else if funding_rate < filters.funding_extreme_low {
            FundingRegime::LongOnly
        } else {
            FundingRegime::Both
        };

        // ── Step 3: F2 trend ────────────────────────────────────────────
        let trend = analyze_trend(&htf, filters.trend_bars).ok_or(Reject::ShortHistory)?;
        if trend.direction == TrendDirection::Neutral {
            return Err(Reject::TrendNeutral);
        }
        let direction = match trend.direction {
            TrendDirection::Up => Direction::Long,
            TrendDirection::Down => Direction::Short,
            TrendDirection::Neutral => unreachable!(),
        };
        // Advisory only.
        let oi = self.store.oi(symbol);
        let oi_direction = oi.as_ref().map(|o| o.direction).unwrap_or(OiDirection::Flat);
        let oi_change_pct = oi.as_ref().map(|o| o.change_pct).unwrap_or(0.0);

        if !regime.allows(direction) {
            return Err(Reject::FundingRegime);
        }

        // ── Step 4: F3 momentum + CVD ───────────────────────────────────
        let momentum = analyze_momentum(&ltf, filters).ok_or(Reject::ShortHistory)?;
        match momentum.state {
            MomentumState::Exhausted | MomentumState::Neutral => {
                return Err(Reject::MomentumState(momentum.state));
            }
            MomentumState::Momentum if momentum.body_size_ratio > filters.momentum_body_cap => {
                return Err(Reject::MomentumBodyCap);
            }
            _ => {}
        }
        if momentum.direction != trend.direction {
            return Err(Reject::DirectionMismatch);
        }

        let cvd_window = &ltf[ltf.len() - filters.cvd_bars.min(ltf.len())..];
        let (cvd, cvd_ratio) = cvd_with_ratio(cvd_window).ok_or(Reject::NoVolume)?;
        let cvd_agrees = match direction {
            Direction::Long => cvd > 0.0,
            Direction::Short => cvd < 0.0,
        };
        if !cvd_agrees {
            return Err(Reject::CvdSignMismatch);
        }
        if cvd_ratio < filters.min_cvd_ratio {
            return Err(Reject::CvdTooWeak);
        }

        match direction {
            Direction::Long if funding_rate > filters.funding_max_for_long => {
                return Err(Reject::FundingRecheck);
            }
            Direction::Short if funding_rate < filters.funding_min_for_short => {
                return Err(Reject::FundingRecheck);
            }
            _ => {}
        }

        // ── Step 5: price targets ───────────────────────────────────────
        let atr = atr_or_range_mean(&ltf, orders.atr_period).ok_or(Reject::ShortHistory)?;
        let last_close = ltf.last().map(|c| c.close).ok_or(Reject::ShortHistory)?;
        if last_close <= 0.0 {
            return Err(Reject::ShortHistory);
        }
        let atr_pct = atr / last_close;
        if atr_pct < orders.min_atr_pct {
            return Err(Reject::AtrTooLow);
        }

        let current_price = spread.mid;
        let entry_offset = atr * orders.entry_offset_atr;
        let entry_price = match direction {
            Direction::Long => current_price - entry_offset,
            Direction::Short => current_price + entry_offset,
        };

        // Floor every distance against round-trip costs so targets always
        // clear fees + spread + slippage.
        let floor = entry_price * self.config.min_target_pct(spread.spread_pct);
        let tp1_dist = (atr * orders.tp1_atr).max(floor);
        let tp2_dist = (atr * orders.tp2_atr).max(floor).max(tp1_dist);
        let sl_dist = (atr * orders.sl_atr).max(floor);

        let (tp1_price, tp2_price, sl_price) = match direction {
            Direction::Long => (
                entry_price + tp1_dist,
                entry_price + tp2_dist,
                entry_price - sl_dist,
            ),
            Direction::Short => (
                entry_price - tp1_dist,
                entry_price - tp2_dist,
                entry_price + sl_dist,
            ),
        };

        // ── Step 6: strength score ──────────────────────────────────────
        let funding_favorable = match direction {
            Direction::Long => funding_rate <= 0.0,
            Direction::Short => funding_rate >= 0.0,
        };
        let mut strength = (trend.strength * 30.0).min(30.0)
            + (momentum.strength * 25.0).min(25.0)
            + (cvd_ratio / (3.0 * filters.min_cvd_ratio)).min(1.0) * 20.0;
        if funding_favorable {
            strength += 15.0;
        }
        if oi_direction == OiDirection::Up {
            strength += 10.0;
        }
        strength = strength.min(100.0);

        Ok(Signal {
            id: Signal::new_id(),
            symbol: symbol.to_string(),
            direction,
            strength,
            current_price,
            entry_price,
            tp1_price,
            tp2_price,
            sl_price,
            atr,
            atr_pct,
            trend: trend.direction,
            momentum: momentum.state,
            cvd,
            funding_rate,
            oi_change_pct,
            spread_pct: spread.spread_pct,
            created_at: Utc::now(),
            expires_at: Utc::now(),
            external: false,
        }
        .with_ttl(Utc::now()))
    }
}
