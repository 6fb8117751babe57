// ===============================
// src/metrics.rs
// ===============================
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

use crate::domain::StateEvent;
use crate::zone::Zone;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).unwrap_or_else(|e| panic!("metric {name}: {e}"))
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> IntGaugeVec {
    IntGaugeVec::new(Opts::new(name, help), labels).unwrap_or_else(|e| panic!("metric {name}: {e}"))
}

// -------- Market data --------
pub static TICKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ticks_total", "market data ticks").unwrap_or_else(|e| panic!("metric ticks_total: {e}"))
});

pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("ticks_total_by_symbol", "market data ticks per symbol", &["symbol"]));

pub static STALE_TICKS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("stale_ticks_total", "ticks dropped as older than the last one", &["symbol"]));

// -------- Orders --------
pub static ORDERS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("orders_total", "orders submitted (labels: symbol, side, mode)", &["symbol", "side", "mode"])
});

pub static CANCELS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("cancels_total", "cancel requests sent", &["symbol"]));

pub static ACKS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("acks_total", "order acks received", &["symbol", "status"]));

pub static ALERTS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("alerts_total", "operator alerts raised", &["symbol"]));

// -------- Engine state --------
pub static ZONE: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("zone_active", "1 for the active zone of each symbol", &["symbol", "zone"]));

pub static POSITION_QTY: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("position_qty", "net position (lots)", &["symbol"]));

pub static PNL_REALIZED: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("pnl_realized", "realized PnL (ticks * lots)", &["symbol"]));

pub static GRID_K: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("grid_offset_k", "grid offset coefficient k", &["symbol"]));

pub static GRID_GK: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("grid_zone_profit", "realized zone profit G_k", &["symbol"]));

pub static TRADING_ACTIVE: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("trading_active", "1 while the symbol may open orders", &["symbol"]));

pub static HALTED: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("engine_halted", "1 once an invariant violation halted the symbol", &["symbol"]));

// ---- Config visibility ----
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("config_feed_mode", "feed mode (label: mode)", &["mode"]));

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> =
    Lazy::new(|| gauge_vec("config_symbol", "configured symbols (label: symbol)", &["symbol"]));

pub fn init() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(TICKS.clone()),
        Box::new(TICKS_BY_SYMBOL.clone()),
        Box::new(STALE_TICKS.clone()),
        Box::new(ORDERS.clone()),
        Box::new(CANCELS.clone()),
        Box::new(ACKS.clone()),
        Box::new(ALERTS.clone()),
        Box::new(ZONE.clone()),
        Box::new(POSITION_QTY.clone()),
        Box::new(PNL_REALIZED.clone()),
        Box::new(GRID_K.clone()),
        Box::new(GRID_GK.clone()),
        Box::new(TRADING_ACTIVE.clone()),
        Box::new(HALTED.clone()),
        Box::new(CONFIG_FEED_MODE.clone()),
        Box::new(CONFIG_SYMBOL.clone()),
    ];
    for c in collectors {
        // already registered on a second init() is fine
        let _ = REGISTRY.register(c);
    }
}

/// Mirror a state event into the per-symbol gauges.
pub fn observe_state(ev: &StateEvent) {
    let sym = ev.symbol.as_str();
    for z in Zone::ALL {
        ZONE.with_label_values(&[sym, z.as_str()]).set(i64::from(z == ev.zone));
    }
    POSITION_QTY.with_label_values(&[sym]).set(ev.position.qty);
    PNL_REALIZED.with_label_values(&[sym]).set(ev.position.realized_pnl);
    GRID_K.with_label_values(&[sym]).set(i64::from(ev.k));
    GRID_GK.with_label_values(&[sym]).set(ev.g_k);
    TRADING_ACTIVE
        .with_label_values(&[sym])
        .set(i64::from(ev.trading == crate::domain::TradingStatus::Active));
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

async fn handle(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let body = encode_metrics();
    let resp = Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from("# encode error\n")));
    Ok(resp)
}

/// Serve every path with the metrics page until the runtime shuts down.
pub async fn serve_metrics(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
    let server = match Server::try_bind(&addr) {
        Ok(b) => b.serve(make_svc),
        Err(e) => {
            error!(?e, %addr, "metrics bind failed");
            return;
        }
    };
    info!("metrics listening on http://{addr}/metrics");
    if let Err(e) = server.await {
        error!(?e, "metrics server stopped");
    }
}
