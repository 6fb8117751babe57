// ===============================
// src/positions.rs (net position & PnL)
// ===============================
use serde::{Deserialize, Serialize};

use crate::domain::Side;

/// Net position of one instrument. Mutated only by fills.
/// `avg_px` is in ticks, `realized_pnl` in ticks * lots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position { pub qty: i64, pub avg_px: i64, pub realized_pnl: i64 }

impl Position {
    pub fn is_flat(&self) -> bool { self.qty == 0 }

    /// Apply one fill and return the PnL it realised.
    pub fn apply_fill(&mut self, side: Side, qty: i64, px: i64) -> i64 {
        if qty <= 0 {
            return 0;
        }
        let signed_qty = side.sign() * qty;
        let prev_qty = self.qty;
        let new_qty = prev_qty + signed_qty;

        if prev_qty == 0 || prev_qty.signum() == signed_qty.signum() {
            // same direction -> blend average cost
            self.avg_px = (self.avg_px * prev_qty.abs() + px * qty) / (prev_qty.abs() + qty);
            self.qty = new_qty;
            return 0;
        }

        // opposite direction -> realise on the closed part
        let qty_closed = qty.min(prev_qty.abs());
        let pnl = (px - self.avg_px) * qty_closed * prev_qty.signum();
        self.realized_pnl += pnl;
        self.qty = new_qty;
        if new_qty == 0 {
            self.avg_px = 0;
        } else if new_qty.signum() != prev_qty.signum() {
            // flipped through flat: the remainder was opened at this fill
            self.avg_px = px;
        }
        pnl
    }

    pub fn unrealized(&self, mark: i64) -> i64 {
        if self.qty == 0 { 0 } else { (mark - self.avg_px) * self.qty }
    }

    /// Mark-to-market PnL (realised + unrealised).
    pub fn total_pnl(&self, mark: i64) -> i64 { self.realized_pnl + self.unrealized(mark) }
}
