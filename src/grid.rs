// ===============================
// src/grid.rs (trailing grid oscillation inside the active zone)
// ===============================
//
// Buy  when price fell at least one grid below the last fill AND bounced P_t off the low.
// Sell when price rose at least one grid above the last fill AND pulled back P_t off the high.
// Size = m * Q_a + k * Q_offset, m = whole grids travelled since the last fill.
//
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ZoneConfig;
use crate::domain::Side;
use crate::positions::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridParams {
    pub grid_step: i64,
    pub trail: i64,
    pub base_qty: i64,
    pub offset_qty: i64,
    pub n_grids: i64,
    pub swing_range: i64,
    pub max_position: Option<i64>,
}

impl GridParams {
    pub fn from_config(cfg: &ZoneConfig) -> Self {
        Self {
            grid_step: cfg.grid_step,
            trail: cfg.trail,
            base_qty: cfg.base_qty,
            offset_qty: cfg.offset_qty,
            n_grids: cfg.n_grids,
            swing_range: cfg.swing_range(),
            max_position: cfg.max_position,
        }
    }
}

/// Per-zone oscillation state. `ledger` is the inventory traded by the grid in
/// this zone only; its realised PnL feeds `g_k`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscillationState {
    pub last_order_px: i64,
    pub highest: i64,
    pub lowest: i64,
    pub k: u32,
    pub g_k: i64,
    pub ledger: Position,
}

impl OscillationState {
    pub fn at(price: i64) -> Self {
        Self { last_order_px: price, highest: price, lowest: price, k: 0, g_k: 0, ledger: Position::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIntent {
    pub side: Side,
    pub qty: i64,
    pub limit_px: i64,
    /// Whole grid steps between the trigger price and the last fill.
    pub steps: i64,
}

/// What the grid needs to know about the instrument's current book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exposure {
    pub position: i64,
    pub pending_buy: i64,
    pub pending_sell: i64,
    pub blocked_buy: bool,
    pub blocked_sell: bool,
}

#[derive(Debug, Clone)]
pub struct GridEngine {
    params: GridParams,
    state: OscillationState,
}

impl GridEngine {
    pub fn new(params: GridParams, entry_px: i64) -> Self {
        Self { params, state: OscillationState::at(entry_px) }
    }

    pub fn from_state(params: GridParams, state: OscillationState) -> Self { Self { params, state } }

    pub fn state(&self) -> &OscillationState { &self.state }

    pub fn params(&self) -> &GridParams { &self.params }

    /// Zone entry: anchor everything at `price`, k = 0, G_k = 0.
    pub fn reset(&mut self, price: i64) { self.state = OscillationState::at(price); }

    pub fn on_price(&mut self, price: i64) {
        if price > self.state.highest { self.state.highest = price; }
        if price < self.state.lowest { self.state.lowest = price; }
    }

    /// Q = m * Q_a + k * Q_offset
    pub fn order_qty(&self, m: i64) -> i64 {
        m * self.params.base_qty + i64::from(self.state.k) * self.params.offset_qty
    }

    /// G_k_th = (P_H - P_L) * (N_grids * Q_a + k * Q_offset)
    pub fn k_threshold(&self) -> i64 {
        self.params.swing_range
            * (self.params.n_grids * self.params.base_qty + i64::from(self.state.k) * self.params.offset_qty)
    }

    pub fn evaluate(&self, price: i64, exposure: &Exposure) -> Option<GridIntent> {
        let s = &self.state;
        let p = &self.params;
        let side = if s.last_order_px - price >= p.grid_step && price - s.lowest >= p.trail {
            Side::Buy
        } else if price - s.last_order_px >= p.grid_step && s.highest - price >= p.trail {
            Side::Sell
        } else {
            return None;
        };
        let blocked = match side {
            Side::Buy => exposure.blocked_buy,
            Side::Sell => exposure.blocked_sell,
        };
        if blocked {
            return None;
        }

        let steps = (price - s.last_order_px).abs() / p.grid_step;
        let mut qty = self.order_qty(steps);
        if let Some(cap) = p.max_position {
            let room = match side {
                Side::Buy => cap - (exposure.position + exposure.pending_buy),
                Side::Sell => cap + (exposure.position - exposure.pending_sell),
            };
            qty = qty.min(room.max(0));
        }
        if qty <= 0 {
            debug!(side = side.as_str(), price, "grid trigger clipped to zero");
            return None;
        }
        Some(GridIntent { side, qty, limit_px: price, steps })
    }

    /// Apply a grid fill. Returns true when it pushed `k` up.
    pub fn on_fill(&mut self, side: Side, qty: i64, px: i64) -> bool {
        let realised = self.state.ledger.apply_fill(side, qty, px);
        self.state.g_k += realised;
        self.state.last_order_px = px;
        self.state.highest = px;
        self.state.lowest = px;

        let threshold = self.k_threshold();
        if self.state.g_k > threshold {
            self.state.k += 1;
            self.state.g_k = 0;
            info!(k = self.state.k, threshold, "grid offset coefficient raised");
            return true;
        }
        false
    }
}
