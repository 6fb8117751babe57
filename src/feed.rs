// ===============================
// src/feed.rs
// ===============================
//
// Market data adapters:
// - run_mock      : random walk around a start price
// - run_binance   : Binance combined stream, `<sym>@bookTicker` for the touch
//                   and `<sym>@trade` for the last traded price
//
// Prices leave this module as integer ticks (price * price_scale).
//
use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::PriceTick;
use crate::metrics::{TICKS, TICKS_BY_SYMBOL};

fn now_ms() -> i64 { Utc::now().timestamp_millis() }

fn publish(md_tx: &broadcast::Sender<PriceTick>, tick: PriceTick) {
    TICKS.inc();
    TICKS_BY_SYMBOL.with_label_values(&[&tick.symbol]).inc();
    let _ = md_tx.send(tick);
}

/// Random-walk generator. `max_step` ticks per move, one-tick spread.
pub async fn run_mock(
    md_tx: broadcast::Sender<PriceTick>,
    symbol: String,
    start_px: i64,
    max_step: i64,
    every_ms: u64,
) {
    let mut last = start_px;
    let floor = (start_px / 2).max(1);
    let step = max_step.max(1);
    loop {
        // ThreadRng must not live across .await
        let mv = rand::thread_rng().gen_range(-step..=step);
        last = (last + mv).max(floor);
        publish(&md_tx, PriceTick { symbol: symbol.clone(), ts_ms: now_ms(), last, bid: last - 1, ask: last + 1 });
        sleep(Duration::from_millis(every_ms)).await;
    }
}

/// Latest touch and trade seen on the combined stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookState {
    pub bid: Option<i64>,
    pub ask: Option<i64>,
    pub last: Option<i64>,
}

fn scaled(v: Option<&serde_json::Value>, scale: i64) -> Option<i64> {
    let px = v?.as_str()?.parse::<f64>().ok()?;
    let t = (px * scale as f64).round() as i64;
    (t > 0).then_some(t)
}

/// Fold one combined-stream frame into `book`. Returns a tick once bid, ask
/// and last are all known.
pub fn apply_frame(book: &mut BookState, symbol: &str, txt: &str, scale: i64, ts_ms: i64) -> Option<PriceTick> {
    let v: serde_json::Value = serde_json::from_str(txt).ok()?;
    let stream = v.get("stream")?.as_str()?;
    let data = v.get("data")?;
    if stream.ends_with("@bookTicker") {
        // {"u":400900217,"s":"BNBUSDT","b":"25.35190000","B":"31.21","a":"25.36520000","A":"40.66"}
        book.bid = scaled(data.get("b"), scale).or(book.bid);
        book.ask = scaled(data.get("a"), scale).or(book.ask);
    } else if stream.ends_with("@trade") {
        // {"e":"trade","E":..,"s":"BNBUSDT","t":..,"p":"25.35","q":"1.0","T":..}
        book.last = scaled(data.get("p"), scale).or(book.last);
    } else {
        return None;
    }
    Some(PriceTick { symbol: symbol.to_string(), ts_ms, last: book.last?, bid: book.bid?, ask: book.ask? })
}

/// Binance public market data (read-only). `ws_base` is e.g.
/// `wss://stream.binance.com:9443` or `wss://testnet.binance.vision`.
pub async fn run_binance(md_tx: broadcast::Sender<PriceTick>, symbol: String, ws_base: String, scale: i64) {
    let sym = symbol.to_lowercase();
    let ws_url = format!(
        "{}/stream?streams={sym}@bookTicker/{sym}@trade",
        ws_base.trim_end_matches('/').trim_end_matches("/ws")
    );
    let mut book = BookState::default();

    let mut attempt: u32 = 0;
    loop {
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad ws url");
                return;
            }
        };

        info!(%ws_url, "connecting binance stream");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                info!(%symbol, "connected to binance stream");
                attempt = 0;

                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(m) if m.is_text() => {
                            let txt = match m.into_text() {
                                Ok(t) => t,
                                Err(e) => {
                                    warn!(?e, "failed to read text frame");
                                    continue;
                                }
                            };
                            if let Some(tick) = apply_frame(&mut book, &symbol, &txt, scale, now_ms()) {
                                publish(&md_tx, tick);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(?e, "ws read error");
                            break;
                        }
                    }
                }
                info!(%symbol, "binance stream disconnected, will reconnect");
            }
            Err(e) => {
                error!(?e, "connect failed");
            }
        }

        // exponential backoff + jitter, 0.5s..32s
        attempt = attempt.saturating_add(1);
        let base_ms = 500u64.saturating_mul(1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..=250);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_touch_and_trade_before_ticking() {
        let mut book = BookState::default();
        let bt = r#"{"stream":"btcusdt@bookTicker","data":{"s":"BTCUSDT","b":"100.01","B":"1","a":"100.03","A":"2"}}"#;
        let tr = r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT","p":"100.02","q":"0.5"}}"#;
        assert!(apply_frame(&mut book, "BTCUSDT", bt, 100, 1).is_none());
        let tick = apply_frame(&mut book, "BTCUSDT", tr, 100, 2).unwrap();
        assert_eq!((tick.bid, tick.ask, tick.last, tick.ts_ms), (10_001, 10_003, 10_002, 2));
    }

    #[test]
    fn ignores_garbage_and_other_streams() {
        let mut book = BookState::default();
        assert!(apply_frame(&mut book, "X", "not json", 100, 0).is_none());
        assert!(apply_frame(&mut book, "X", r#"{"stream":"x@depth","data":{}}"#, 100, 0).is_none());
        assert_eq!(book, BookState::default());
    }

    #[tokio::test]
    async fn mock_feed_publishes_ticks() {
        let (tx, mut rx) = broadcast::channel(16);
        let h = tokio::spawn(run_mock(tx, "MOCK".into(), 10_000, 3, 1));
        let t = rx.recv().await.unwrap();
        h.abort();
        assert_eq!(t.symbol, "MOCK");
        assert!((t.last - 10_000).abs() <= 3);
        assert_eq!(t.ask - t.bid, 2);
    }
}
