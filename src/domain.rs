// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

use crate::positions::Position;
use crate::stop::BreachKind;
use crate::zone::Zone;

/// Client order id. Generated per engine as `<SYMBOL>-<seq>` so replays are reproducible.
pub type OrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }

impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
    pub fn as_str(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// Execution aggressiveness, ordered from passive to aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode { Patient, Accelerated, Urgent, Panic }

impl Mode {
    /// Next more aggressive tier. PANIC saturates.
    pub fn escalate(self) -> Mode {
        match self {
            Mode::Patient => Mode::Accelerated,
            Mode::Accelerated => Mode::Urgent,
            Mode::Urgent | Mode::Panic => Mode::Panic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Patient => "patient",
            Mode::Accelerated => "accelerated",
            Mode::Urgent => "urgent",
            Mode::Panic => "panic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType { Limit, Market }

/// Prices are integer ticks (price * price_scale), quantities integer lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote { pub last: i64, pub bid: i64, pub ask: i64 }

impl Quote {
    /// Mid snapped to a whole tick on the side that gives less away:
    /// down for a buy, up for a sell.
    pub fn mid_for(&self, side: Side) -> i64 {
        let sum = self.bid + self.ask;
        match side {
            Side::Buy => sum.div_euclid(2),
            Side::Sell => (sum + 1).div_euclid(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick { pub symbol: String, pub ts_ms: i64, pub last: i64, pub bid: i64, pub ask: i64 }

impl PriceTick {
    pub fn quote(&self) -> Quote { Quote { last: self.last, bid: self.bid, ask: self.ask } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus { Accepted, PartiallyFilled, Filled, Rejected(String), Cancelled }

impl AckStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AckStatus::Accepted => "accepted",
            AckStatus::PartiallyFilled => "partial",
            AckStatus::Filled => "filled",
            AckStatus::Rejected(_) => "rejected",
            AckStatus::Cancelled => "cancelled",
        }
    }
}

/// Execution report from the order-management side.
/// `fill_qty` is the cumulative filled quantity and `fill_price` the average price of
/// those fills, so a late or duplicated report never double-counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub symbol: String,
    pub status: AckStatus,
    pub fill_price: Option<i64>,
    pub fill_qty: Option<i64>,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub price: i64,
    pub order_type: OrderType,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest { pub order_id: OrderId, pub symbol: String }

/// Whether the instrument may still open new orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingStatus {
    Active,
    /// Exit after a stop breach has flattened the position.
    Stopped(BreachKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub symbol: String,
    pub ts_ms: i64,
    pub zone: Zone,
    pub position: Position,
    pub k: u32,
    pub g_k: i64,
    pub trading: TradingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert { pub symbol: String, pub ts_ms: i64, pub order_id: Option<OrderId>, pub reason: String }

/// Output of one evaluation step, in the order it must be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Submit(OrderRequest),
    Cancel(CancelRequest),
    State(StateEvent),
    Alert(Alert),
}

/// Everything the recorder writes to JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Md(PriceTick), Ack(OrderAck), Cmd(Command), Note(String) }
