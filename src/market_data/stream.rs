// =============================================================================
// ExchangeStream — one WebSocket session feeding the market-data plane
// =============================================================================
//
// A single session carries every subscription: one kline stream per
// (symbol, timeframe) plus a mark-price stream per symbol. Inbound frames are
// demultiplexed by event type and symbol. Only confirmed (closed) klines go
// to the aggregator; in-progress updates land in the store's current-candle
// map, mark prices in the mark-price map.
//
// Reconnect policy: exponential backoff 1 s · 2ⁿ, at most 5 attempts per
// outage. A successful connect resets the counter and resubscribes the full
// set. Exhausting the attempts publishes `StreamLost` and ends the task —
// the engine degrades rather than spinning forever.
//
// Parse errors are logged and dropped; they never kill the session.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::events::{EngineEvent, EventBus};

use super::{Candle, CandleAggregator, CandleKey, MarketDataStore};

const PING_INTERVAL: Duration = Duration::from_secs(15);
const BACKOFF_BASE_SECS: u64 = 1;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Subscription set
// ---------------------------------------------------------------------------

/// The full set of streams one session carries.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub symbols: Vec<String>,
    pub intervals: Vec<String>,
}

impl Subscription {
    pub fn new(symbols: Vec<String>, intervals: Vec<String>) -> Self {
        Self { symbols, intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Stream names in exchange notation: `<sym>@kline_<tf>` per timeframe
    /// plus `<sym>@markPrice@1s` per symbol.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.symbols.len() * (self.intervals.len() + 1));
        for symbol in &self.symbols {
            let lower = symbol.to_lowercase();
            for interval in &self.intervals {
                names.push(format!("{lower}@kline_{interval}"));
            }
            names.push(format!("{lower}@markPrice@1s"));
        }
        names
    }
}

fn subscription_request(method: &str, streams: &[String], id: u64) -> String {
    serde_json::json!({
        "method": method,
        "params": streams,
        "id": id,
    })
    .to_string()
}

/// Delay before reconnect attempt `attempt` (1-based): 1 s, 2 s, 4 s, 8 s, 16 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECS << (attempt.saturating_sub(1)).min(8))
}

// ---------------------------------------------------------------------------
// Inbound message demultiplexing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Kline {
        symbol: String,
        interval: String,
        candle: Candle,
        confirmed: bool,
    },
    MarkPrice {
        symbol: String,
        price: f64,
    },
    /// Subscription ack (`{"result":null,"id":N}`).
    Ack,
    /// Known-shape but irrelevant event.
    Ignored,
}

/// Numeric fields arrive as JSON strings on this wire.
fn value_f64(value: &serde_json::Value, name: &str) -> Result<f64> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

fn parse_stream_event(text: &str) -> Result<StreamEvent> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream JSON")?;

    if root.get("id").is_some() && root.get("e").is_none() {
        return Ok(StreamEvent::Ack);
    }

    match root["e"].as_str() {
        Some("kline") => {
            let symbol = root["s"]
                .as_str()
                .context("kline event missing field s")?
                .to_uppercase();
            let k = &root["k"];
            let interval = k["i"].as_str().context("kline missing k.i")?.to_string();
            let candle = Candle {
                open_time: k["t"].as_i64().context("kline missing k.t")?,
                open: value_f64(&k["o"], "k.o")?,
                high: value_f64(&k["h"], "k.h")?,
                low: value_f64(&k["l"], "k.l")?,
                close: value_f64(&k["c"], "k.c")?,
                volume: value_f64(&k["v"], "k.v")?,
            };
            let confirmed = k["x"].as_bool().context("kline missing k.x")?;
            Ok(StreamEvent::Kline {
                symbol,
                interval,
                candle,
                confirmed,
            })
        }
        Some("markPriceUpdate") => {
            let symbol = root["s"]
                .as_str()
                .context("mark-price event missing field s")?
                .to_uppercase();
            let price = value_f64(&root["p"], "p")?;
            Ok(StreamEvent::MarkPrice { symbol, price })
        }
        _ => Ok(StreamEvent::Ignored),
    }
}

// ---------------------------------------------------------------------------
// Session driver
// ---------------------------------------------------------------------------

/// Handle to a running stream task.
pub struct ExchangeStream {
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExchangeStream {
    /// Spawn the stream task with the given subscription set. The task owns
    /// the reconnect loop and runs until shutdown or `StreamLost`.
    pub fn spawn(
        url: String,
        subscription: Subscription,
        store: Arc<MarketDataStore>,
        aggregator: Arc<CandleAggregator>,
        bus: EventBus,
    ) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let flag = connected.clone();
        let handle = tokio::spawn(async move {
            run_stream(url, subscription, store, aggregator, bus, flag, shutdown_rx).await;
        });

        Self {
            connected,
            shutdown,
            handle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Signal shutdown and wait for the task to drain (bounded).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

async fn run_stream(
    url: String,
    subscription: Subscription,
    store: Arc<MarketDataStore>,
    aggregator: Arc<CandleAggregator>,
    bus: EventBus,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    if subscription.is_empty() {
        warn!("market stream started with an empty subscription set — exiting");
        return;
    }

    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match run_session(&url, &subscription, &store, &aggregator, &connected, &mut shutdown).await
        {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Disconnected { was_connected }) | Err(StreamError { was_connected }) => {
                connected.store(false, Ordering::SeqCst);
                // A healthy session resets the ladder: attempts count per
                // outage, not per process lifetime.
                if was_connected {
                    attempt = 0;
                }
                attempt += 1;
                if attempt >= MAX_RECONNECT_ATTEMPTS {
                    error!(attempt, "market stream lost — reconnect attempts exhausted");
                    bus.publish(EngineEvent::StreamLost {
                        reason: format!("reconnect failed after {attempt} attempts"),
                    });
                    break;
                }
                let delay = backoff_delay(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), "market stream reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
                continue;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    info!("market stream task finished");
}

enum SessionEnd {
    Shutdown,
    Disconnected { was_connected: bool },
}

/// Connection-phase failure, tagged with whether the session ever got up.
struct StreamError {
    was_connected: bool,
}

async fn run_session(
    url: &str,
    subscription: &Subscription,
    store: &Arc<MarketDataStore>,
    aggregator: &Arc<CandleAggregator>,
    connected: &Arc<AtomicBool>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, StreamError> {
    info!(url, streams = subscription.stream_names().len(), "connecting market stream");

    let (ws, _response) = match connect_async(url).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "failed to connect market stream");
            return Err(StreamError {
                was_connected: false,
            });
        }
    };
    let (mut write, mut read) = ws.split();

    // Resubscribe the full set on every (re)connect.
    let streams = subscription.stream_names();
    if let Err(e) = write
        .send(Message::Text(subscription_request("SUBSCRIBE", &streams, 1)))
        .await
    {
        warn!(error = %e, "failed to send subscribe request");
        return Err(StreamError {
            was_connected: false,
        });
    }

    connected.store(true, Ordering::SeqCst);
    info!(streams = streams.len(), "market stream connected and subscribed");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; swallow it.
    ping.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Best-effort unsubscribe + close before dropping the socket.
                let _ = write
                    .send(Message::Text(subscription_request("UNSUBSCRIBE", &streams, 2)))
                    .await;
                let _ = write.send(Message::Close(None)).await;
                info!("market stream closed on shutdown");
                return Ok(SessionEnd::Shutdown);
            }
            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!("market stream ping failed");
                    return Ok(SessionEnd::Disconnected { was_connected: true });
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, store, aggregator);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {
                        // Protocol frames handled by tungstenite; binary unused.
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("market stream closed by peer");
                        return Ok(SessionEnd::Disconnected { was_connected: true });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "market stream read error");
                        return Ok(SessionEnd::Disconnected { was_connected: true });
                    }
                    None => {
                        warn!("market stream ended");
                        return Ok(SessionEnd::Disconnected { was_connected: true });
                    }
                }
            }
        }
    }
}

fn handle_text(text: &str, store: &Arc<MarketDataStore>, aggregator: &Arc<CandleAggregator>) {
    match parse_stream_event(text) {
        Ok(StreamEvent::Kline {
            symbol,
            interval,
            candle,
            confirmed,
        }) => {
            if confirmed {
                aggregator.on_candle_close(&symbol, &interval, candle);
            } else {
                store.set_current_candle(CandleKey::new(symbol, interval), candle);
            }
        }
        Ok(StreamEvent::MarkPrice { symbol, price }) => {
            store.set_mark_price(&symbol, price);
        }
        Ok(StreamEvent::Ack) => debug!("subscription ack received"),
        Ok(StreamEvent::Ignored) => {}
        Err(e) => warn!(error = %e, "unparseable stream message dropped"),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_is_exponential() {
        let delays: Vec<u64> = (1..=MAX_RECONNECT_ATTEMPTS)
            .map(|a| backoff_delay(a).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn stream_names_cover_all_pairs() {
        let sub = Subscription::new(
            vec!["BTCUSDT".into(), "ETHUSDT".into()],
            vec!["1m".into(), "5m".into()],
        );
        let names = sub.stream_names();
        assert_eq!(names.len(), 6); // 2 symbols × (2 klines + 1 mark price)
        assert!(names.contains(&"btcusdt@kline_1m".to_string()));
        assert!(names.contains(&"ethusdt@kline_5m".to_string()));
        assert!(names.contains(&"btcusdt@markPrice@1s".to_string()));
    }

    #[test]
    fn subscribe_request_shape() {
        let req = subscription_request("SUBSCRIBE", &["btcusdt@kline_1m".to_string()], 1);
        let v: serde_json::Value = serde_json::from_str(&req).unwrap();
        assert_eq!(v["method"], "SUBSCRIBE");
        assert_eq!(v["params"][0], "btcusdt@kline_1m");
        assert_eq!(v["id"], 1);
    }

    #[test]
    fn parse_confirmed_kline() {
        let json = r#"{
            "e": "kline", "E": 1700000060000, "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
                "o": "37000.00", "h": "37050.00", "l": "36990.00", "c": "37020.00",
                "v": "123.456", "x": true
            }
        }"#;
        match parse_stream_event(json).unwrap() {
            StreamEvent::Kline {
                symbol,
                interval,
                candle,
                confirmed,
            } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(interval, "1m");
                assert!(confirmed);
                assert!((candle.close - 37020.0).abs() < f64::EPSILON);
                assert_eq!(candle.open_time, 1_700_000_000_000);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_unconfirmed_kline() {
        let json = r#"{
            "e": "kline", "s": "ethusdt",
            "k": { "t": 0, "i": "5m", "o": "2000", "h": "2001", "l": "1999", "c": "2000.5", "v": "10", "x": false }
        }"#;
        match parse_stream_event(json).unwrap() {
            StreamEvent::Kline {
                symbol, confirmed, ..
            } => {
                assert_eq!(symbol, "ETHUSDT");
                assert!(!confirmed);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_mark_price() {
        let json = r#"{"e":"markPriceUpdate","E":1700000001000,"s":"BTCUSDT","p":"37011.12","r":"0.0001","T":1700028800000}"#;
        match parse_stream_event(json).unwrap() {
            StreamEvent::MarkPrice { symbol, price } => {
                assert_eq!(symbol, "BTCUSDT");
                assert!((price - 37011.12).abs() < 1e-9);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_subscription_ack() {
        let json = r#"{"result":null,"id":1}"#;
        assert_eq!(parse_stream_event(json).unwrap(), StreamEvent::Ack);
    }

    #[test]
    fn unknown_event_is_ignored() {
        let json = r#"{"e":"aggTrade","s":"BTCUSDT","p":"37000"}"#;
        assert_eq!(parse_stream_event(json).unwrap(), StreamEvent::Ignored);
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(parse_stream_event("not json at all").is_err());
        assert!(parse_stream_event(r#"{"e":"kline","s":"BTCUSDT","k":{}}"#).is_err());
    }
}
