// ===============================
// src/gateway.rs (mock venue)
// ===============================
//
// Accepts every order (or rejects at `reject_rate`), fills market orders at
// once and limit orders after `fill_ms`: half first, the rest one delay
// later. Cancels of resting orders are honoured; a cancel that loses the
// race against the final fill is ignored, like a real venue.
//
use ahash::AHashMap;
use chrono::Utc;
use rand::Rng;
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::domain::{AckStatus, CancelRequest, OrderAck, OrderId, OrderRequest, OrderType};

#[derive(Debug, Clone)]
pub enum GatewayMsg {
    Submit(OrderRequest),
    Cancel(CancelRequest),
}

#[derive(Debug, Clone)]
struct Resting {
    req: OrderRequest,
    filled: i64,
    due_ms: i64,
}

/// Venue book, separate from the async loop so it can be driven by hand in tests.
#[derive(Debug, Default)]
pub struct MockVenue {
    resting: AHashMap<OrderId, Resting>,
    fill_ms: i64,
}

fn ack(req: &OrderRequest, status: AckStatus, fill: Option<(i64, i64)>, ts_ms: i64) -> OrderAck {
    OrderAck {
        order_id: req.order_id.clone(),
        symbol: req.symbol.clone(),
        status,
        fill_price: fill.map(|f| f.1),
        fill_qty: fill.map(|f| f.0),
        ts_ms,
    }
}

impl MockVenue {
    pub fn new(fill_ms: u64) -> Self { Self { resting: AHashMap::new(), fill_ms: fill_ms as i64 } }

    pub fn resting_len(&self) -> usize { self.resting.len() }

    pub fn submit(&mut self, req: OrderRequest, rejected: bool, now: i64) -> Vec<OrderAck> {
        if rejected {
            return vec![ack(&req, AckStatus::Rejected("mock reject".into()), None, now)];
        }
        let mut out = vec![ack(&req, AckStatus::Accepted, None, now)];
        if req.order_type == OrderType::Market {
            out.push(ack(&req, AckStatus::Filled, Some((req.qty, req.price)), now));
            return out;
        }
        self.resting.insert(req.order_id.clone(), Resting { req, filled: 0, due_ms: now + self.fill_ms });
        out
    }

    pub fn cancel(&mut self, req: &CancelRequest, now: i64) -> Option<OrderAck> {
        let r = self.resting.remove(&req.order_id)?;
        let fill = (r.filled > 0).then_some((r.filled, r.req.price));
        Some(ack(&r.req, AckStatus::Cancelled, fill, now))
    }

    /// Advance the clock: fill whatever is due.
    pub fn poll(&mut self, now: i64) -> Vec<OrderAck> {
        let mut due: Vec<OrderId> = self
            .resting
            .iter()
            .filter(|(_, r)| r.due_ms <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();

        let mut out = Vec::new();
        for id in due {
            let Some(r) = self.resting.get_mut(&id) else { continue };
            let half = r.req.qty / 2;
            if r.filled == 0 && half > 0 {
                r.filled = half;
                r.due_ms = now + self.fill_ms;
                out.push(ack(&r.req, AckStatus::PartiallyFilled, Some((half, r.req.price)), now));
            } else if let Some(r) = self.resting.remove(&id) {
                out.push(ack(&r.req, AckStatus::Filled, Some((r.req.qty, r.req.price)), now));
            }
        }
        out
    }
}

pub async fn run(mut rx: mpsc::Receiver<GatewayMsg>, ack_tx: mpsc::Sender<OrderAck>, fill_ms: u64, reject_rate: f64) {
    let mut venue = MockVenue::new(fill_ms);
    let mut clock = interval(Duration::from_millis(5));
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(fill_ms, reject_rate, "mock gateway started");

    loop {
        let acks = tokio::select! {
            msg = rx.recv() => {
                let now = Utc::now().timestamp_millis();
                match msg {
                    Some(GatewayMsg::Submit(req)) => {
                        let rejected = reject_rate > 0.0 && rand::thread_rng().gen_bool(reject_rate.min(1.0));
                        debug!(order_id = %req.order_id, side = req.side.as_str(), qty = req.qty, px = req.price, rejected, "gateway: new order");
                        venue.submit(req, rejected, now)
                    }
                    Some(GatewayMsg::Cancel(c)) => venue.cancel(&c, now).into_iter().collect(),
                    None => break,
                }
            }
            _ = clock.tick() => venue.poll(Utc::now().timestamp_millis()),
        };
        for a in acks {
            if ack_tx.send(a).await.is_err() {
                return;
            }
        }
    }
    info!("mock gateway stopped");
}
