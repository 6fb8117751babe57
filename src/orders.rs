// ===============================
// src/orders.rs (order state machine & per-instrument book)
// ===============================
//
//   Pending -> Accepted -> PartiallyFilled -> Filled
//      |          |              |
//      |          +--------------+--> CancelPending -> Cancelled
//      +--> Rejected
//
// Terminal: Filled, Rejected, Cancelled. A slot (purpose, side) holds at most
// one non-terminal order.
//
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Mode, OrderId, OrderType, Side};
use crate::zone::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose { Grid(Zone), Exit }

impl Purpose {
    pub fn label(&self) -> &'static str {
        match self {
            Purpose::Grid(_) => "grid",
            Purpose::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus { Pending, Accepted, PartiallyFilled, CancelPending, Filled, Rejected, Cancelled }

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub seq: u64,
    pub side: Side,
    pub qty: i64,
    pub filled_qty: i64,
    pub avg_fill_px: i64,
    /// Price the intent asked for, before mode pricing.
    pub limit_px: i64,
    /// Price actually sent.
    pub price: i64,
    pub order_type: OrderType,
    pub mode: Mode,
    pub purpose: Purpose,
    /// Zone visit the order belongs to. Grid fills only steer the grid of that visit.
    #[serde(default)]
    pub epoch: u64,
    pub status: OrderStatus,
    pub created_ts: i64,
    pub status_ts: i64,
    /// Rejections seen along this order's replace chain.
    pub rejects: u32,
    /// Mode of the replacement to send once a cancel completes.
    pub replace_mode: Option<Mode>,
    pub cancel_ts: Option<i64>,
}

/// A fill increment derived from a cumulative report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillDelta { pub qty: i64, pub px: i64 }

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("slot {purpose:?}/{side:?} already held by {existing}")]
    SlotTaken { purpose: Purpose, side: Side, existing: OrderId },
    #[error("order {id} reported {cum} filled of {qty}")]
    Overfill { id: OrderId, cum: i64, qty: i64 },
}

impl Order {
    pub fn remaining(&self) -> i64 { self.qty - self.filled_qty }

    pub fn is_live(&self) -> bool { !self.status.is_terminal() }

    pub fn set_status(&mut self, status: OrderStatus, ts: i64) {
        self.status = status;
        self.status_ts = ts;
    }

    /// Reconcile a cumulative fill report. Reports that do not advance the
    /// cumulative quantity are stale or duplicated and yield `None`.
    pub fn apply_cumulative(&mut self, cum: i64, avg_px: i64, ts: i64) -> Result<Option<FillDelta>, OrderError> {
        if cum <= self.filled_qty {
            return Ok(None);
        }
        if cum > self.qty {
            return Err(OrderError::Overfill { id: self.id.clone(), cum, qty: self.qty });
        }
        let delta = cum - self.filled_qty;
        let px = (cum * avg_px - self.filled_qty * self.avg_fill_px) / delta;
        self.filled_qty = cum;
        self.avg_fill_px = avg_px;
        if cum == self.qty {
            self.set_status(OrderStatus::Filled, ts);
        } else if matches!(self.status, OrderStatus::Pending | OrderStatus::Accepted) {
            self.set_status(OrderStatus::PartiallyFilled, ts);
        }
        Ok(Some(FillDelta { qty: delta, px }))
    }
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    orders: AHashMap<OrderId, Order>,
    next_seq: u64,
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        Self { symbol: symbol.to_string(), orders: AHashMap::new(), next_seq: 1 }
    }

    pub fn from_parts(symbol: &str, orders: Vec<Order>, next_seq: u64) -> Self {
        let orders = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        Self { symbol: symbol.to_string(), orders, next_seq }
    }

    pub fn next_seq(&self) -> u64 { self.next_seq }

    /// Reserve the next id (`<SYMBOL>-<seq>`).
    pub fn allocate(&mut self) -> (OrderId, u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        (format!("{}-{}", self.symbol, seq), seq)
    }

    pub fn insert(&mut self, order: Order) -> Result<(), OrderError> {
        if let Some(existing) = self.outstanding(order.purpose, order.side) {
            return Err(OrderError::SlotTaken {
                purpose: order.purpose,
                side: order.side,
                existing: existing.id.clone(),
            });
        }
        self.orders.insert(order.id.clone(), order);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Order> { self.orders.get(id) }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Order> { self.orders.get_mut(id) }

    pub fn outstanding(&self, purpose: Purpose, side: Side) -> Option<&Order> {
        self.orders.values().find(|o| o.is_live() && o.purpose == purpose && o.side == side)
    }

    /// Non-terminal orders, oldest first.
    pub fn live(&self) -> Vec<&Order> {
        let mut v: Vec<&Order> = self.orders.values().filter(|o| o.is_live()).collect();
        v.sort_by_key(|o| o.seq);
        v
    }

    /// Ids of live orders matching `pred`, oldest first.
    pub fn live_ids<F>(&self, pred: F) -> Vec<OrderId>
    where
        F: Fn(&Order) -> bool,
    {
        self.live().into_iter().filter(|o| pred(o)).map(|o| o.id.clone()).collect()
    }

    pub fn has_live_exit(&self) -> bool {
        self.orders.values().any(|o| o.is_live() && o.purpose == Purpose::Exit)
    }

    /// Unfilled quantity of live grid orders on `side`.
    pub fn pending_grid_qty(&self, side: Side) -> i64 {
        self.orders
            .values()
            .filter(|o| o.is_live() && o.side == side && matches!(o.purpose, Purpose::Grid(_)))
            .map(Order::remaining)
            .sum()
    }

    /// Drop terminal orders untouched for `retention_ms`.
    pub fn prune(&mut self, now_ms: i64, retention_ms: i64) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, o| o.is_live() || now_ms - o.status_ts < retention_ms);
        before - self.orders.len()
    }

    /// Every tracked order, oldest first.
    pub fn all(&self) -> Vec<Order> {
        let mut v: Vec<Order> = self.orders.values().cloned().collect();
        v.sort_by_key(|o| o.seq);
        v
    }

    pub fn len(&self) -> usize { self.orders.len() }

    pub fn is_empty(&self) -> bool { self.orders.is_empty() }
}
