// ===============================
// src/main.rs
// ===============================
/*
 # run against the mock feed / mock venue
 SWING_LOW=90 SWING_HIGH=110 GRID_STEP=0.5 TRAIL=0.2 STOP_LOSS=500 PROFIT_TAKE=800 \
   cargo run -- --symbols BTCUSDT --snapshot-dir ./state

 # active zone and position per symbol
 curl -s localhost:9898/metrics | egrep '^(zone_active|position_qty|grid_offset_k)'
*/
/*
=============================================================================
Project : swing_grid_bot — zone-based swing grid engine in Rust
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Streams market data (mock/Binance), tracks price zones, runs
          trailing grid oscillation inside the active zone, escalates order
          aggressiveness, exits on stop breach, exposes Prometheus metrics,
          records JSONL events and persists engine snapshots.
=============================================================================
*/
use ahash::AHashMap as HashMap;
use tokio::{
    select,
    sync::{broadcast, mpsc},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use swing_grid_bot::config::{self, MarketMode};
use swing_grid_bot::coordinator::Coordinator;
use swing_grid_bot::domain::{Event, OrderAck, PriceTick};
use swing_grid_bot::engine::{self, EngineIo};
use swing_grid_bot::gateway::{self, GatewayMsg};
use swing_grid_bot::snapshot::SnapshotStore;
use swing_grid_bot::{feed, metrics, posttrade, recorder};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config ----
    let (args, zones) = match config::load() {
        Ok(v) => v,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if zones.is_empty() {
        error!("no symbols configured");
        std::process::exit(1);
    }

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        feed_mode = args.feed_mode.as_str(),
        symbols = ?args.symbols,
        ws = %args.ws_url(),
        snapshot_dir = ?args.snapshot_dir,
        "startup config"
    );
    metrics::CONFIG_FEED_MODE.with_label_values(&[args.feed_mode.as_str()]).set(1);
    for z in &zones {
        metrics::CONFIG_SYMBOL.with_label_values(&[&z.symbol]).set(1);
        info!(
            symbol = %z.symbol,
            swing_low = z.swing_low,
            swing_high = z.swing_high,
            grid_step = z.grid_step,
            trail = z.trail,
            "zone config"
        );
    }

    // ---- Snapshots ----
    let store = match &args.snapshot_dir {
        Some(dir) => match SnapshotStore::new(dir.clone()) {
            Ok(s) => Some(s),
            Err(e) => {
                error!(%e, "snapshot dir unusable");
                std::process::exit(1);
            }
        },
        None => None,
    };

    // ---- Buses ----
    let (md_tx, _md_rx) = broadcast::channel::<PriceTick>(4096);
    let (gw_tx, gw_rx) = mpsc::channel::<GatewayMsg>(2048);
    let (ack_central_tx, mut ack_central_rx) = mpsc::channel::<OrderAck>(4096);
    let (post_tx, post_rx) = mpsc::channel::<posttrade::PostTrade>(4096);

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let rec_tx = match args.record_file.clone() {
        Some(path) => {
            tokio::spawn(recorder::run(rec_rx, path));
            Some(rec_tx)
        }
        None => None,
    };

    // ---- Gateway & post-trade ----
    tokio::spawn(gateway::run(gw_rx, ack_central_tx, args.mock_fill_ms, args.mock_reject_rate));
    tokio::spawn(posttrade::run(post_rx));

    // ---- Engines, one per symbol ----
    let snapshot_every = Duration::from_secs(args.snapshot_every_secs.max(1));
    let mut ack_txs: HashMap<String, mpsc::Sender<OrderAck>> = HashMap::new();
    let mut engines = Vec::new();
    for zc in zones.iter().cloned() {
        let restored = match &store {
            Some(st) => match st.load(&zc.symbol) {
                Ok(Some(snap)) => match Coordinator::restore(zc.clone(), snap) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(symbol = %zc.symbol, %e, "snapshot not usable, starting fresh");
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    warn!(symbol = %zc.symbol, %e, "snapshot load failed, starting fresh");
                    None
                }
            },
            None => None,
        };
        let coord = match restored {
            Some(c) => c,
            None => match Coordinator::new(zc.clone()) {
                Ok(c) => c,
                Err(e) => {
                    error!(symbol = %zc.symbol, %e, "invalid zone config");
                    std::process::exit(1);
                }
            },
        };

        let (ack_tx, ack_rx) = mpsc::channel::<OrderAck>(2048);
        ack_txs.insert(zc.symbol.clone(), ack_tx);
        let io = EngineIo {
            md_rx: md_tx.subscribe(),
            ack_rx,
            gw_tx: gw_tx.clone(),
            post_tx: post_tx.clone(),
            rec_tx: rec_tx.clone(),
        };
        engines.push(tokio::spawn(engine::run(coord, io, store.clone(), snapshot_every)));
    }
    drop(gw_tx);
    drop(post_tx);

    // Dispatcher: route acks to the engine of their symbol
    tokio::spawn(async move {
        while let Some(ack) = ack_central_rx.recv().await {
            match ack_txs.get(&ack.symbol) {
                Some(tx) => {
                    let _ = tx.send(ack).await;
                }
                None => tracing::debug!(symbol = %ack.symbol, "no engine for symbol"),
            }
        }
    });

    // ---- FEED (Market Data) ----
    let mut feeds = Vec::new();
    for zc in &zones {
        let tx = md_tx.clone();
        let sym = zc.symbol.clone();
        let handle = match args.feed_mode {
            MarketMode::Mock => {
                let start = (zc.swing_low + zc.swing_high) / 2;
                let step = (zc.grid_step / 4).max(1);
                tokio::spawn(feed::run_mock(tx, sym, start, step, 20))
            }
            MarketMode::BinanceSandbox | MarketMode::BinanceMainnet => {
                tokio::spawn(feed::run_binance(tx, sym, args.ws_url(), zc.price_scale))
            }
        };
        feeds.push(handle);
    }

    // ---- Heartbeat + record MD, until Ctrl-C ----
    let mut md_rx_rec = md_tx.subscribe();
    let mut tick_count: u64 = 0;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    loop {
        select! {
            Ok(md) = md_rx_rec.recv() => {
                tick_count += 1;
                if let Some(tx) = &rec_tx {
                    let _ = tx.try_send(Event::Md(md));
                }
            },
            _ = heartbeat.tick() => {
                info!(ticks = tick_count, "heartbeat");
                tick_count = 0;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    // closing market data stops the engines, which write a final snapshot
    for f in feeds {
        f.abort();
    }
    drop(md_rx_rec);
    drop(md_tx);
    for e in engines {
        if let Err(err) = e.await {
            error!(?err, "engine task failed");
        }
    }
    info!("bye");
}
