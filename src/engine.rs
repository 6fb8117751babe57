// ===============================
// src/engine.rs (one task per instrument)
// ===============================
//
// Owns a Coordinator. Ticks (broadcast) and acks (mpsc) are handled one at a
// time in arrival order. Resulting commands go out to the gateway, metrics,
// post-trade and the recorder. Snapshots are written periodically and once
// more on shutdown.
//
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::coordinator::{Coordinator, EngineError};
use crate::domain::{Alert, Command, Event, OrderAck, PriceTick};
use crate::gateway::GatewayMsg;
use crate::metrics;
use crate::posttrade::PostTrade;
use crate::snapshot::SnapshotStore;

pub struct EngineIo {
    pub md_rx: broadcast::Receiver<PriceTick>,
    pub ack_rx: mpsc::Receiver<OrderAck>,
    pub gw_tx: mpsc::Sender<GatewayMsg>,
    pub post_tx: mpsc::Sender<PostTrade>,
    pub rec_tx: Option<mpsc::Sender<Event>>,
}

async fn save(coord: &Coordinator, store: &SnapshotStore) {
    let snap = coord.snapshot();
    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.save(&snap)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(symbol = %coord.symbol(), %e, "snapshot save failed"),
        Err(e) => error!(symbol = %coord.symbol(), ?e, "snapshot task panicked"),
    }
}

fn record(rec_tx: &Option<mpsc::Sender<Event>>, ev: Event) {
    if let Some(tx) = rec_tx {
        let _ = tx.try_send(ev);
    }
}

async fn dispatch(io: &EngineIo, cmds: Vec<Command>) {
    for cmd in cmds {
        match &cmd {
            Command::Submit(req) => {
                metrics::ORDERS.with_label_values(&[&req.symbol, req.side.as_str(), req.mode.as_str()]).inc();
                if io.gw_tx.send(GatewayMsg::Submit(req.clone())).await.is_err() {
                    warn!(order_id = %req.order_id, "gateway closed, submit dropped");
                }
            }
            Command::Cancel(c) => {
                metrics::CANCELS.with_label_values(&[&c.symbol]).inc();
                if io.gw_tx.send(GatewayMsg::Cancel(c.clone())).await.is_err() {
                    warn!(order_id = %c.order_id, "gateway closed, cancel dropped");
                }
            }
            Command::State(ev) => metrics::observe_state(ev),
            Command::Alert(a) => {
                let _ = io.post_tx.send(PostTrade::Alert(a.clone())).await;
            }
        }
        record(&io.rec_tx, Event::Cmd(cmd));
    }
}

async fn handle_result(coord: &Coordinator, io: &EngineIo, res: Result<Vec<Command>, EngineError>, ts_ms: i64) {
    match res {
        Ok(cmds) => dispatch(io, cmds).await,
        Err(EngineError::StaleData { ts, last }) => {
            metrics::STALE_TICKS.with_label_values(&[coord.symbol()]).inc();
            warn!(symbol = %coord.symbol(), ts, last, "stale tick dropped");
        }
        Err(EngineError::Halted) => debug!(symbol = %coord.symbol(), "halted, event ignored"),
        Err(EngineError::InvariantViolation(msg)) => {
            metrics::HALTED.with_label_values(&[coord.symbol()]).set(1);
            let alert = Alert {
                symbol: coord.symbol().to_string(),
                ts_ms,
                order_id: None,
                reason: format!("halted: {msg}"),
            };
            let _ = io.post_tx.send(PostTrade::Alert(alert.clone())).await;
            record(&io.rec_tx, Event::Cmd(Command::Alert(alert)));
        }
    }
}

/// Drive `coord` until market data or the ack stream closes. Returns the final state.
pub async fn run(
    mut coord: Coordinator,
    mut io: EngineIo,
    store: Option<SnapshotStore>,
    snapshot_every: Duration,
) -> Coordinator {
    info!(symbol = %coord.symbol(), zone = coord.zone().as_str(), "engine started");
    let mut snap_tick = interval(snapshot_every);
    snap_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    snap_tick.tick().await;

    loop {
        tokio::select! {
            md = io.md_rx.recv() => match md {
                Ok(tick) => {
                    if tick.symbol != coord.symbol() {
                        continue;
                    }
                    let ts = tick.ts_ms;
                    let res = coord.on_tick(&tick);
                    handle_result(&coord, &io, res, ts).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(symbol = %coord.symbol(), skipped = n, "market data lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            ack = io.ack_rx.recv() => match ack {
                Some(ack) => {
                    let ts = ack.ts_ms;
                    let res = coord.on_ack(&ack);
                    let _ = io.post_tx.send(PostTrade::Ack(ack.clone())).await;
                    record(&io.rec_tx, Event::Ack(ack));
                    handle_result(&coord, &io, res, ts).await;
                }
                None => break,
            },
            _ = snap_tick.tick(), if store.is_some() => {
                if let Some(st) = &store {
                    save(&coord, st).await;
                }
            }
        }
    }

    if let Some(st) = &store {
        save(&coord, st).await;
    }
    info!(symbol = %coord.symbol(), position = coord.position().qty, "engine stopped");
    coord
}
