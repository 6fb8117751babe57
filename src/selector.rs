// ===============================
// src/selector.rs (adaptive order pricing)
// ===============================
//
// PATIENT      -> limit at the requested price
// ACCELERATED  -> limit at the less generous of (last +/- payup, mid)
// URGENT       -> limit at the more generous of (last +/- payup, mid)
// PANIC        -> market, priced at the far touch (ask for buy, bid for sell)
//
use serde::{Deserialize, Serialize};

use crate::domain::{Mode, OrderType, Quote, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedOrder { pub price: i64, pub order_type: OrderType }

/// Pure pricing rule; same inputs always give the same output.
pub fn select(side: Side, mode: Mode, limit_px: i64, quote: &Quote, payup: i64) -> PricedOrder {
    let paid_up = quote.last + side.sign() * payup;
    let mid = quote.mid_for(side);
    let limit = |price| PricedOrder { price, order_type: OrderType::Limit };
    match (mode, side) {
        (Mode::Patient, _) => limit(limit_px),
        (Mode::Accelerated, Side::Buy) => limit(paid_up.min(mid)),
        (Mode::Accelerated, Side::Sell) => limit(paid_up.max(mid)),
        (Mode::Urgent, Side::Buy) => limit(paid_up.max(mid)),
        (Mode::Urgent, Side::Sell) => limit(paid_up.min(mid)),
        (Mode::Panic, Side::Buy) => PricedOrder { price: quote.ask, order_type: OrderType::Market },
        (Mode::Panic, Side::Sell) => PricedOrder { price: quote.bid, order_type: OrderType::Market },
    }
}
