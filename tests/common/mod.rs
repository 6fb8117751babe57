#![allow(dead_code)]

use swing_grid_bot::config::ZoneConfig;
use swing_grid_bot::coordinator::Coordinator;
use swing_grid_bot::domain::{AckStatus, Command, OrderAck, OrderRequest, PriceTick};

pub const SYM: &str = "TEST";

/// Swing 90.00..110.00 at 2 decimals: Inc [9000,9666) Osc [9666,10332) Dec [10332,11000].
pub fn cfg() -> ZoneConfig {
    ZoneConfig {
        symbol: SYM.into(),
        price_scale: 100,
        swing_high: 11_000,
        swing_low: 9_000,
        grid_step: 100,
        trail: 30,
        base_qty: 10,
        offset_qty: 2,
        n_grids: 8,
        payup_ticks: 1,
        stop_loss: 1_000_000,
        profit_take: 1_000_000,
        profit_trail_ratio: None,
        stop_excursion: None,
        max_position: None,
        cancel_distance_grids: 12,
        start_zone: None,
        max_reject_retries: 2,
        patient_timeout_ms: Some(30_000),
        accelerated_timeout_ms: Some(20_000),
        urgent_timeout_ms: Some(10_000),
        cancel_timeout_ms: 5_000,
        reprice_ticks: None,
        max_slippage_ticks: None,
    }
}

pub fn tick(ts_ms: i64, last: i64) -> PriceTick {
    PriceTick { symbol: SYM.into(), ts_ms, last, bid: last - 1, ask: last + 1 }
}

pub fn ack(order_id: &str, ts_ms: i64, status: AckStatus, fill: Option<(i64, i64)>) -> OrderAck {
    OrderAck {
        order_id: order_id.into(),
        symbol: SYM.into(),
        status,
        fill_qty: fill.map(|f| f.0),
        fill_price: fill.map(|f| f.1),
        ts_ms,
    }
}

pub fn submits(cmds: &[Command]) -> Vec<OrderRequest> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::Submit(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

pub fn cancels(cmds: &[Command]) -> Vec<String> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::Cancel(c) => Some(c.order_id.clone()),
            _ => None,
        })
        .collect()
}

pub fn alerts(cmds: &[Command]) -> usize {
    cmds.iter().filter(|c| matches!(c, Command::Alert(_))).count()
}

/// Tick, then answer every resulting command like an instant venue
/// (submits fill in full at their price, cancels confirm). Returns
/// everything the coordinator emitted, in order.
pub fn drive(coord: &mut Coordinator, t: &PriceTick) -> Vec<Command> {
    let mut all = match coord.on_tick(t) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    let mut i = 0;
    while i < all.len() {
        let follow = match &all[i] {
            Command::Submit(r) => {
                let mut v = coord.on_ack(&ack(&r.order_id, t.ts_ms, AckStatus::Accepted, None)).unwrap_or_default();
                v.extend(
                    coord
                        .on_ack(&ack(&r.order_id, t.ts_ms, AckStatus::Filled, Some((r.qty, r.price))))
                        .unwrap_or_default(),
                );
                v
            }
            Command::Cancel(c) => coord
                .on_ack(&ack(&c.order_id, t.ts_ms, AckStatus::Cancelled, None))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        all.extend(follow);
        i += 1;
    }
    all
}
