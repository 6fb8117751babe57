// ===============================
// src/stop.rs (stop-loss / profit-take exits)
// ===============================
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ZoneConfig;
use crate::domain::{Mode, Side};
use crate::positions::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreachKind { StopLoss, Excursion, ProfitTake }

impl BreachKind {
    /// Losses leave at any price; profits can afford a limit.
    pub fn mode(self) -> Mode {
        match self {
            BreachKind::StopLoss | BreachKind::Excursion => Mode::Panic,
            BreachKind::ProfitTake => Mode::Urgent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BreachKind::StopLoss => "stop_loss",
            BreachKind::Excursion => "excursion",
            BreachKind::ProfitTake => "profit_take",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopParams {
    pub stop_loss: i64,
    pub profit_take: i64,
    pub profit_trail_ratio: Option<f64>,
    pub stop_excursion: Option<i64>,
    pub swing_low: i64,
    pub swing_high: i64,
}

impl StopParams {
    pub fn from_config(cfg: &ZoneConfig) -> Self {
        Self {
            stop_loss: cfg.stop_loss,
            profit_take: cfg.profit_take,
            profit_trail_ratio: cfg.profit_trail_ratio,
            stop_excursion: cfg.stop_excursion,
            swing_low: cfg.swing_low,
            swing_high: cfg.swing_high,
        }
    }
}

/// One breach, from the first exit order until the position is flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub kind: BreachKind,
    pub mode: Mode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopState {
    pub peak_pnl: i64,
    pub episode: Option<Episode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitIntent { pub kind: BreachKind, pub side: Side, pub qty: i64, pub mode: Mode }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Hold,
    /// New breach; `exit` is `None` when there is nothing to flatten.
    Breach { kind: BreachKind, exit: Option<ExitIntent> },
    /// Open episode lost its exit order with inventory left.
    Resume(ExitIntent),
    /// Position is flat, the episode is over.
    Completed(BreachKind),
}

#[derive(Debug, Clone)]
pub struct StopManager {
    params: StopParams,
    state: StopState,
}

impl StopManager {
    pub fn new(params: StopParams) -> Self { Self { params, state: StopState::default() } }

    pub fn from_state(params: StopParams, state: StopState) -> Self { Self { params, state } }

    pub fn state(&self) -> &StopState { &self.state }

    pub fn episode(&self) -> Option<&Episode> { self.state.episode.as_ref() }

    /// Which breach, if any, the mark `last` puts the position in. Tracks peak PnL.
    pub fn check(&mut self, last: i64, position: &Position) -> Option<BreachKind> {
        let p = &self.params;
        let pnl = position.total_pnl(last);
        self.state.peak_pnl = self.state.peak_pnl.max(pnl);

        if pnl <= -p.stop_loss {
            return Some(BreachKind::StopLoss);
        }
        if let Some(e) = p.stop_excursion {
            if last < p.swing_low - e || last > p.swing_high + e {
                return Some(BreachKind::Excursion);
            }
        }
        let peak = self.state.peak_pnl;
        let take = match p.profit_trail_ratio {
            Some(r) => peak >= p.profit_take && (peak - pnl) as f64 >= r * peak as f64,
            None => pnl >= p.profit_take,
        };
        take.then_some(BreachKind::ProfitTake)
    }

    /// Per-tick decision. `exit_outstanding` is whether an exit order is live in the book.
    pub fn evaluate(&mut self, last: i64, position: &Position, exit_outstanding: bool) -> StopDecision {
        if let Some(ep) = self.state.episode.as_mut() {
            if position.is_flat() {
                let kind = ep.kind;
                self.state.episode = None;
                return StopDecision::Completed(kind);
            }
            if exit_outstanding {
                return StopDecision::Hold;
            }
            ep.mode = ep.mode.escalate();
            warn!(kind = ep.kind.as_str(), mode = ep.mode.as_str(), qty = position.qty, "re-issuing exit remainder");
            return StopDecision::Resume(flatten(ep.kind, ep.mode, position));
        }

        let Some(kind) = self.check(last, position) else {
            return StopDecision::Hold;
        };
        if position.is_flat() {
            return StopDecision::Breach { kind, exit: None };
        }
        let mode = kind.mode();
        self.state.episode = Some(Episode { kind, mode });
        StopDecision::Breach { kind, exit: Some(flatten(kind, mode, position)) }
    }

    /// Call after every fill. Closes the episode once the position is flat.
    pub fn settle(&mut self, position: &Position) -> Option<BreachKind> {
        if position.is_flat() {
            return self.state.episode.take().map(|ep| ep.kind);
        }
        None
    }

    /// Exit order was replaced at a more aggressive mode.
    pub fn note_mode(&mut self, mode: Mode) {
        if let Some(ep) = self.state.episode.as_mut() {
            ep.mode = ep.mode.max(mode);
        }
    }
}

fn flatten(kind: BreachKind, mode: Mode, position: &Position) -> ExitIntent {
    let side = if position.qty > 0 { Side::Sell } else { Side::Buy };
    ExitIntent { kind, side, qty: position.qty.abs(), mode }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StopParams {
        StopParams {
            stop_loss: 1_000,
            profit_take: 2_000,
            profit_trail_ratio: None,
            stop_excursion: None,
            swing_low: 9_000,
            swing_high: 11_000,
        }
    }

    fn long(qty: i64, px: i64) -> Position {
        let mut p = Position::default();
        p.apply_fill(Side::Buy, qty, px);
        p
    }

    #[test]
    fn stop_loss_exits_at_panic() {
        let mut s = StopManager::new(params());
        let pos = long(10, 10_000);
        assert_eq!(s.evaluate(9_950, &pos, false), StopDecision::Hold);
        let d = s.evaluate(9_900, &pos, false);
        assert_eq!(
            d,
            StopDecision::Breach {
                kind: BreachKind::StopLoss,
                exit: Some(ExitIntent { kind: BreachKind::StopLoss, side: Side::Sell, qty: 10, mode: Mode::Panic }),
            }
        );
    }

    #[test]
    fn no_second_exit_while_outstanding() {
        let mut s = StopManager::new(params());
        let pos = long(10, 10_000);
        assert!(matches!(s.evaluate(9_800, &pos, false), StopDecision::Breach { .. }));
        for px in [9_700, 9_600, 9_500] {
            assert_eq!(s.evaluate(px, &pos, true), StopDecision::Hold);
        }
    }

    #[test]
    fn lost_exit_resumes_one_mode_up() {
        let mut p = params();
        p.profit_take = 1_000;
        let mut s = StopManager::new(p);
        let mut pos = long(10, 10_000);
        assert!(matches!(s.evaluate(10_100, &pos, false), StopDecision::Breach { kind: BreachKind::ProfitTake, .. }));
        pos.apply_fill(Side::Sell, 4, 10_100);
        match s.evaluate(10_100, &pos, false) {
            StopDecision::Resume(exit) => {
                assert_eq!(exit.qty, 6);
                assert_eq!(exit.mode, Mode::Panic);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn completes_when_flat() {
        let mut s = StopManager::new(params());
        let mut pos = long(10, 10_000);
        s.evaluate(9_800, &pos, false);
        pos.apply_fill(Side::Sell, 10, 9_800);
        assert_eq!(s.settle(&pos), Some(BreachKind::StopLoss));
        assert!(s.episode().is_none());
    }

    #[test]
    fn flat_breach_has_nothing_to_exit() {
        let mut s = StopManager::new(params());
        let mut pos = long(10, 10_000);
        pos.apply_fill(Side::Sell, 10, 9_850);
        assert_eq!(s.evaluate(9_850, &pos, false), StopDecision::Breach { kind: BreachKind::StopLoss, exit: None });
    }

    #[test]
    fn excursion_beyond_range() {
        let mut p = params();
        p.stop_excursion = Some(500);
        p.stop_loss = 1_000_000;
        let mut s = StopManager::new(p);
        let pos = long(1, 9_000);
        assert_eq!(s.check(8_500, &pos), None);
        assert_eq!(s.check(8_499, &pos), Some(BreachKind::Excursion));
    }

    #[test]
    fn trailing_profit_take() {
        let mut p = params();
        p.profit_trail_ratio = Some(0.25);
        let mut s = StopManager::new(p);
        let pos = long(10, 10_000);
        // pnl 3000, peak 3000
        assert_eq!(s.check(10_300, &pos), None);
        // pnl 2300, drawdown 700 < 750
        assert_eq!(s.check(10_230, &pos), None);
        // pnl 2200, drawdown 800
        assert_eq!(s.check(10_220, &pos), Some(BreachKind::ProfitTake));
    }

    #[test]
    fn exit_is_requested_again_on_every_tick_without_one() {
        let mut s = StopManager::new(params());
        let pos = long(10, 10_000);
        assert!(matches!(s.evaluate(9_800, &pos, false), StopDecision::Breach { .. }));
        // the exit was rejected for good; price recovering does not end the episode
        for px in [9_700, 10_500] {
            match s.evaluate(px, &pos, false) {
                StopDecision::Resume(exit) => assert_eq!((exit.qty, exit.mode), (10, Mode::Panic)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
