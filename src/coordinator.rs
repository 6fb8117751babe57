// ===============================
// src/coordinator.rs (per-instrument decision loop)
// ===============================
//
// Owns every piece of mutable state for one instrument and turns ticks and
// acks into commands. Synchronous and deterministic: time only comes from
// the events themselves, so a restored snapshot replays identically.
//
// Tick pipeline:
//   stale check -> zone walk -> grid extremes -> order timers -> stop
//   -> grid trigger -> far-order cancels -> state event
//
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ZoneConfig};
use crate::domain::{
    AckStatus, Alert, CancelRequest, Command, Mode, OrderAck, OrderId, OrderRequest, OrderType, PriceTick, Quote, Side,
    StateEvent, TradingStatus,
};
use crate::grid::{Exposure, GridEngine, GridParams, OscillationState};
use crate::orders::{FillDelta, Order, OrderBook, OrderError, OrderStatus, Purpose};
use crate::positions::Position;
use crate::selector::select;
use crate::snapshot::{EngineSnapshot, SnapshotError, SNAPSHOT_VERSION};
use crate::stop::{StopDecision, StopManager, StopParams};
use crate::zone::{Zone, ZoneMachine, ZoneTable};

/// Terminal orders stay queryable this long before being pruned.
const ORDER_RETENTION_MS: i64 = 10 * 60 * 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("stale tick at {ts} (last processed {last})")]
    StaleData { ts: i64, last: i64 },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("instrument halted")]
    Halted,
}

impl From<OrderError> for EngineError {
    fn from(e: OrderError) -> Self { EngineError::InvariantViolation(e.to_string()) }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    cfg: ZoneConfig,
    zones: ZoneMachine,
    grid: GridEngine,
    stop: StopManager,
    book: OrderBook,
    position: Position,
    trading: TradingStatus,
    last_ts: Option<i64>,
    last_quote: Option<Quote>,
    halted: Option<String>,
    zone_epoch: u64,
}

impl Coordinator {
    pub fn new(cfg: ZoneConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let table = ZoneTable::new(cfg.swing_low, cfg.swing_high, cfg.grid_step);
        let initial = cfg.start_zone.unwrap_or(Zone::Osc);
        Ok(Self {
            zones: ZoneMachine::new(table, initial),
            grid: GridEngine::new(GridParams::from_config(&cfg), 0),
            stop: StopManager::new(StopParams::from_config(&cfg)),
            book: OrderBook::new(&cfg.symbol),
            position: Position::default(),
            trading: TradingStatus::Active,
            last_ts: None,
            last_quote: None,
            halted: None,
            zone_epoch: 0,
            cfg,
        })
    }

    pub fn symbol(&self) -> &str { &self.cfg.symbol }
    pub fn config(&self) -> &ZoneConfig { &self.cfg }
    pub fn zone(&self) -> Zone { self.zones.active() }
    pub fn zone_table(&self) -> &ZoneTable { self.zones.table() }
    pub fn position(&self) -> &Position { &self.position }
    pub fn oscillation(&self) -> &OscillationState { self.grid.state() }
    pub fn trading(&self) -> &TradingStatus { &self.trading }
    pub fn book(&self) -> &OrderBook { &self.book }
    pub fn last_quote(&self) -> Option<Quote> { self.last_quote }
    pub fn is_halted(&self) -> bool { self.halted.is_some() }

    pub fn on_tick(&mut self, tick: &PriceTick) -> Result<Vec<Command>, EngineError> {
        if self.halted.is_some() {
            return Err(EngineError::Halted);
        }
        if tick.symbol != self.cfg.symbol {
            debug!(symbol = %tick.symbol, "tick for another instrument ignored");
            return Ok(Vec::new());
        }
        if let Some(last) = self.last_ts {
            if tick.ts_ms < last {
                return Err(EngineError::StaleData { ts: tick.ts_ms, last });
            }
        }
        let res = self.process_tick(tick);
        self.trip(res)
    }

    pub fn on_ack(&mut self, ack: &OrderAck) -> Result<Vec<Command>, EngineError> {
        if self.halted.is_some() {
            return Err(EngineError::Halted);
        }
        let res = self.process_ack(ack);
        self.trip(res)
    }

    fn trip<T>(&mut self, res: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(EngineError::InvariantViolation(msg)) = &res {
            error!(symbol = %self.cfg.symbol, %msg, "invariant violated, halting instrument");
            self.halted = Some(msg.clone());
        }
        res
    }

    fn process_tick(&mut self, tick: &PriceTick) -> Result<Vec<Command>, EngineError> {
        let q = tick.quote();
        let now = tick.ts_ms;
        let first = self.last_quote.is_none();
        self.last_ts = Some(now);
        self.last_quote = Some(q);
        let mut out = Vec::new();

        if first {
            let zone = self.cfg.start_zone.unwrap_or_else(|| self.zones.table().locate(q.last));
            self.zones = ZoneMachine::new(self.zones.table().clone(), zone);
            self.grid.reset(q.last);
            info!(symbol = %self.cfg.symbol, zone = zone.as_str(), price = q.last, "zone tracking started");
        } else {
            for t in self.zones.on_price(q.last) {
                self.zone_epoch += 1;
                info!(symbol = %self.cfg.symbol, from = t.from.as_str(), to = t.to.as_str(), price = t.price, "zone transition");
                let stale = self.book.live_ids(|o| matches!(o.purpose, Purpose::Grid(z) if z != t.to));
                for id in stale {
                    self.request_cancel(&id, None, now, &mut out);
                }
                self.grid.reset(q.last);
            }
        }

        self.grid.on_price(q.last);
        self.run_timers(now, &q, &mut out)?;
        self.run_stop(now, &q, &mut out)?;
        self.run_grid(now, &q, &mut out)?;
        self.cancel_far(now, &q, &mut out);

        let pruned = self.book.prune(now, ORDER_RETENTION_MS);
        if pruned > 0 {
            debug!(symbol = %self.cfg.symbol, pruned, "terminal orders pruned");
        }
        out.push(Command::State(self.state_event(now)));
        Ok(out)
    }

    fn mode_timeout(&self, mode: Mode) -> Option<i64> {
        match mode {
            Mode::Patient => self.cfg.patient_timeout_ms,
            Mode::Accelerated => self.cfg.accelerated_timeout_ms,
            Mode::Urgent => self.cfg.urgent_timeout_ms,
            Mode::Panic => None,
        }
    }

    /// Grid order the market has run away from by more than the slippage bound.
    fn beyond_slippage(&self, o: &Order, last: i64) -> bool {
        matches!(o.purpose, Purpose::Grid(_))
            && self.cfg.max_slippage_ticks.is_some_and(|s| o.side.sign() * (last - o.limit_px) > s)
    }

    // slippage abandon, escalation on timeout or drift, cancel timeouts
    fn run_timers(&mut self, now: i64, q: &Quote, out: &mut Vec<Command>) -> Result<(), EngineError> {
        let live: Vec<Order> = self.book.live().into_iter().cloned().collect();

        for o in live {
            if o.status == OrderStatus::CancelPending {
                let since = o.cancel_ts.unwrap_or(o.created_ts);
                if now - since >= self.cfg.cancel_timeout_ms {
                    warn!(symbol = %self.cfg.symbol, order_id = %o.id, "cancel not confirmed, treating as cancelled");
                    self.finish_cancel(&o.id, now, q, out)?;
                }
                continue;
            }
            if self.beyond_slippage(&o, q.last) {
                info!(symbol = %self.cfg.symbol, order_id = %o.id, limit = o.limit_px, price = q.last, "slippage bound passed, abandoning order");
                self.request_cancel(&o.id, None, now, out);
                continue;
            }
            let timed_out = self.mode_timeout(o.mode).is_some_and(|t| now - o.created_ts >= t);
            // market moved away from the resting price
            let drifted = o.order_type == OrderType::Limit
                && self.cfg.reprice_ticks.is_some_and(|r| o.side.sign() * (q.last - o.price) >= r);
            if timed_out || drifted {
                let next = o.mode.escalate();
                let reason = if timed_out { "timeout" } else { "drift" };
                info!(symbol = %self.cfg.symbol, order_id = %o.id, from = o.mode.as_str(), to = next.as_str(), reason, "escalating order");
                self.request_cancel(&o.id, Some(next), now, out);
            }
        }
        Ok(())
    }

    fn run_stop(&mut self, now: i64, q: &Quote, out: &mut Vec<Command>) -> Result<(), EngineError> {
        if self.trading != TradingStatus::Active && self.stop.episode().is_none() {
            return Ok(());
        }
        let exit_live = self.book.has_live_exit();
        match self.stop.evaluate(q.last, &self.position, exit_live) {
            StopDecision::Hold => {}
            StopDecision::Breach { kind, exit } => {
                warn!(symbol = %self.cfg.symbol, kind = kind.as_str(), pnl = self.position.total_pnl(q.last), "stop breached");
                for id in self.book.live_ids(|o| matches!(o.purpose, Purpose::Grid(_))) {
                    self.request_cancel(&id, None, now, out);
                }
                match exit {
                    Some(e) => {
                        self.submit(Purpose::Exit, e.side, e.qty, q.last, e.mode, 0, now, q, out)?;
                    }
                    None => self.trading = TradingStatus::Stopped(kind),
                }
            }
            StopDecision::Resume(e) => {
                self.submit(Purpose::Exit, e.side, e.qty, q.last, e.mode, 0, now, q, out)?;
            }
            StopDecision::Completed(kind) => {
                info!(symbol = %self.cfg.symbol, kind = kind.as_str(), "exit complete, trading stopped");
                self.trading = TradingStatus::Stopped(kind);
            }
        }
        Ok(())
    }

    fn run_grid(&mut self, now: i64, q: &Quote, out: &mut Vec<Command>) -> Result<(), EngineError> {
        let zone = self.zones.active();
        if self.trading != TradingStatus::Active || self.stop.episode().is_some() || zone.is_net() {
            return Ok(());
        }
        let slot = Purpose::Grid(zone);
        let exposure = Exposure {
            position: self.position.qty,
            pending_buy: self.book.pending_grid_qty(Side::Buy),
            pending_sell: self.book.pending_grid_qty(Side::Sell),
            blocked_buy: self.book.outstanding(slot, Side::Buy).is_some(),
            blocked_sell: self.book.outstanding(slot, Side::Sell).is_some(),
        };
        if let Some(intent) = self.grid.evaluate(q.last, &exposure) {
            info!(
                symbol = %self.cfg.symbol,
                zone = zone.as_str(),
                side = intent.side.as_str(),
                qty = intent.qty,
                steps = intent.steps,
                k = self.grid.state().k,
                "grid trigger"
            );
            self.submit(slot, intent.side, intent.qty, intent.limit_px, Mode::Patient, 0, now, q, out)?;
        }
        Ok(())
    }

    fn cancel_far(&mut self, now: i64, q: &Quote, out: &mut Vec<Command>) {
        let max_dist = self.cfg.cancel_distance_grids * self.cfg.grid_step;
        let far = self.book.live_ids(|o| {
            matches!(o.purpose, Purpose::Grid(_))
                && o.status != OrderStatus::CancelPending
                && (o.price - q.last).abs() > max_dist
        });
        for id in far {
            info!(symbol = %self.cfg.symbol, order_id = %id, "grid order too far from market, cancelling");
            self.request_cancel(&id, None, now, out);
        }
    }

    fn request_cancel(&mut self, id: &str, replace: Option<Mode>, now: i64, out: &mut Vec<Command>) {
        let Some(o) = self.book.get_mut(id) else { return };
        if !o.is_live() {
            return;
        }
        if o.status == OrderStatus::CancelPending {
            if replace.is_none() {
                o.replace_mode = None;
            }
            return;
        }
        o.set_status(OrderStatus::CancelPending, now);
        o.replace_mode = replace;
        o.cancel_ts = Some(now);
        out.push(Command::Cancel(CancelRequest { order_id: id.to_string(), symbol: self.cfg.symbol.clone() }));
    }

    /// Cancel is done (acked or timed out): close the order and send its replacement, if any.
    fn finish_cancel(&mut self, id: &str, now: i64, q: &Quote, out: &mut Vec<Command>) -> Result<(), EngineError> {
        let Some(o) = self.book.get_mut(id) else { return Ok(()) };
        o.set_status(OrderStatus::Cancelled, now);
        let replace = o.replace_mode.take();
        let old = o.clone();
        match replace {
            Some(mode) => self.replace(&old, mode, now, q, out),
            None => Ok(()),
        }
    }

    /// Re-issue what is left of `old` at `mode`, if it still makes sense.
    fn replace(&mut self, old: &Order, mode: Mode, now: i64, q: &Quote, out: &mut Vec<Command>) -> Result<(), EngineError> {
        let (side, qty) = match old.purpose {
            Purpose::Grid(z) => {
                let wanted = z == self.zones.active()
                    && old.epoch == self.zone_epoch
                    && !z.is_net()
                    && self.trading == TradingStatus::Active
                    && self.stop.episode().is_none()
                    && !self.beyond_slippage(old, q.last);
                if !wanted {
                    return Ok(());
                }
                (old.side, old.remaining())
            }
            Purpose::Exit => {
                if self.stop.episode().is_none() {
                    return Ok(());
                }
                let side = if self.position.qty > 0 { Side::Sell } else { Side::Buy };
                (side, self.position.qty.abs())
            }
        };
        if qty <= 0 {
            return Ok(());
        }
        self.submit(old.purpose, side, qty, old.limit_px, mode, old.rejects, now, q, out)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn submit(
        &mut self,
        purpose: Purpose,
        side: Side,
        qty: i64,
        limit_px: i64,
        mode: Mode,
        rejects: u32,
        now: i64,
        q: &Quote,
        out: &mut Vec<Command>,
    ) -> Result<OrderId, EngineError> {
        let priced = select(side, mode, limit_px, q, self.cfg.payup_ticks);
        let (id, seq) = self.book.allocate();
        self.book.insert(Order {
            id: id.clone(),
            seq,
            side,
            qty,
            filled_qty: 0,
            avg_fill_px: 0,
            limit_px,
            price: priced.price,
            order_type: priced.order_type,
            mode,
            purpose,
            epoch: self.zone_epoch,
            status: OrderStatus::Pending,
            created_ts: now,
            status_ts: now,
            rejects,
            replace_mode: None,
            cancel_ts: None,
        })?;
        if purpose == Purpose::Exit {
            self.stop.note_mode(mode);
        }
        debug!(symbol = %self.cfg.symbol, order_id = %id, purpose = purpose.label(), side = side.as_str(), qty, price = priced.price, mode = mode.as_str(), "submit");
        out.push(Command::Submit(OrderRequest {
            order_id: id.clone(),
            symbol: self.cfg.symbol.clone(),
            side,
            qty,
            price: priced.price,
            order_type: priced.order_type,
            mode,
        }));
        Ok(id)
    }

    fn process_ack(&mut self, ack: &OrderAck) -> Result<Vec<Command>, EngineError> {
        let mut out = Vec::new();
        let now = ack.ts_ms;
        let Some(order) = self.book.get_mut(&ack.order_id) else {
            let carries_fill =
                ack.fill_qty.is_some() || matches!(ack.status, AckStatus::Filled | AckStatus::PartiallyFilled);
            if carries_fill {
                error!(symbol = %self.cfg.symbol, order_id = %ack.order_id, status = ack.status.label(), fill_qty = ?ack.fill_qty, "fill for untracked order, position may be out of sync");
                out.push(Command::Alert(Alert {
                    symbol: self.cfg.symbol.clone(),
                    ts_ms: now,
                    order_id: Some(ack.order_id.clone()),
                    reason: format!("fill reported for untracked order {}", ack.order_id),
                }));
            } else {
                warn!(symbol = %self.cfg.symbol, order_id = %ack.order_id, status = ack.status.label(), "ack for unknown order ignored");
            }
            return Ok(out);
        };

        // a missing average price falls back to the price the order was sent at
        let fill = match (ack.fill_qty, ack.fill_price) {
            (Some(cum), avg) => Some((cum, avg.unwrap_or(order.price))),
            (None, avg) if ack.status == AckStatus::Filled => Some((order.qty, avg.unwrap_or(order.price))),
            _ => None,
        };
        let delta = match fill {
            Some((cum, avg)) => order.apply_cumulative(cum, avg, now)?,
            None => None,
        };
        let snapshot = order.clone();

        if let Some(d) = delta {
            self.apply_fill(&snapshot, d)?;
        }

        match &ack.status {
            AckStatus::Accepted => {
                if let Some(o) = self.book.get_mut(&ack.order_id) {
                    if o.status == OrderStatus::Pending {
                        o.set_status(OrderStatus::Accepted, now);
                    }
                }
            }
            AckStatus::PartiallyFilled | AckStatus::Filled => {}
            AckStatus::Rejected(reason) => self.on_reject(&snapshot, reason, now, &mut out)?,
            AckStatus::Cancelled => {
                match snapshot.status {
                    OrderStatus::CancelPending => {
                        if let Some(q) = self.last_quote {
                            self.finish_cancel(&snapshot.id, now, &q, &mut out)?;
                        }
                    }
                    s if !s.is_terminal() => {
                        warn!(symbol = %self.cfg.symbol, order_id = %snapshot.id, "unsolicited cancel");
                        if let Some(o) = self.book.get_mut(&snapshot.id) {
                            o.set_status(OrderStatus::Cancelled, now);
                        }
                    }
                    _ => {}
                }
            }
        }

        if let Some(kind) = self.stop.settle(&self.position) {
            info!(symbol = %self.cfg.symbol, kind = kind.as_str(), "position flat after exit, trading stopped");
            self.trading = TradingStatus::Stopped(kind);
        }
        Ok(out)
    }

    fn apply_fill(&mut self, order: &Order, d: FillDelta) -> Result<(), EngineError> {
        let realised = self.position.apply_fill(order.side, d.qty, d.px);
        info!(
            symbol = %self.cfg.symbol,
            order_id = %order.id,
            purpose = order.purpose.label(),
            side = order.side.as_str(),
            qty = d.qty,
            px = d.px,
            realised,
            position = self.position.qty,
            "fill"
        );
        if let Some(cap) = self.cfg.max_position {
            if self.position.qty.abs() > cap {
                return Err(EngineError::InvariantViolation(format!(
                    "position {} beyond cap {cap} after fill on {}",
                    self.position.qty, order.id
                )));
            }
        }
        if order.purpose == Purpose::Grid(self.zones.active()) && order.epoch == self.zone_epoch {
            self.grid.on_fill(order.side, d.qty, d.px);
        }
        Ok(())
    }

    fn on_reject(&mut self, order: &Order, reason: &str, now: i64, out: &mut Vec<Command>) -> Result<(), EngineError> {
        // already closed locally (e.g. cancel timed out); nothing to retry
        if order.status.is_terminal() {
            return Ok(());
        }
        let rejects = order.rejects + 1;
        if let Some(o) = self.book.get_mut(&order.id) {
            o.set_status(OrderStatus::Rejected, now);
            o.rejects = rejects;
        }
        warn!(symbol = %self.cfg.symbol, order_id = %order.id, rejects, %reason, "order rejected");

        if rejects <= self.cfg.max_reject_retries {
            if let Some(q) = self.last_quote {
                let mut retry = order.clone();
                retry.rejects = rejects;
                return self.replace(&retry, order.mode.escalate(), now, &q, out);
            }
            return Ok(());
        }

        out.push(Command::Alert(Alert {
            symbol: self.cfg.symbol.clone(),
            ts_ms: now,
            order_id: Some(order.id.clone()),
            reason: format!("order rejected {rejects} times: {reason}"),
        }));
        if order.purpose == Purpose::Exit {
            // the stop episode stays open; the next tick sends a fresh exit
            error!(symbol = %self.cfg.symbol, order_id = %order.id, "exit retries exhausted, re-issuing on next tick");
        }
        Ok(())
    }

    fn state_event(&self, now: i64) -> StateEvent {
        let osc = self.grid.state();
        StateEvent {
            symbol: self.cfg.symbol.clone(),
            ts_ms: now,
            zone: self.zones.active(),
            position: self.position,
            k: osc.k,
            g_k: osc.g_k,
            trading: self.trading.clone(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            symbol: self.cfg.symbol.clone(),
            zone: self.zones.active(),
            zone_epoch: self.zone_epoch,
            position: self.position,
            oscillation: self.grid.state().clone(),
            stop: self.stop.state().clone(),
            orders: self.book.all(),
            next_seq: self.book.next_seq(),
            last_ts: self.last_ts,
            last_quote: self.last_quote,
            trading: self.trading.clone(),
            halted: self.halted.clone(),
        }
    }

    pub fn restore(cfg: ZoneConfig, snap: EngineSnapshot) -> Result<Self, SnapshotError> {
        if snap.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version { found: snap.version, expected: SNAPSHOT_VERSION });
        }
        if snap.symbol != cfg.symbol {
            return Err(SnapshotError::SymbolMismatch { expected: cfg.symbol.clone(), found: snap.symbol });
        }
        cfg.validate()?;
        let table = ZoneTable::new(cfg.swing_low, cfg.swing_high, cfg.grid_step);
        Ok(Self {
            zones: ZoneMachine::new(table, snap.zone),
            grid: GridEngine::from_state(GridParams::from_config(&cfg), snap.oscillation),
            stop: StopManager::from_state(StopParams::from_config(&cfg), snap.stop),
            book: OrderBook::from_parts(&cfg.symbol, snap.orders, snap.next_seq),
            position: snap.position,
            trading: snap.trading,
            last_ts: snap.last_ts,
            last_quote: snap.last_quote,
            halted: snap.halted,
            zone_epoch: snap.zone_epoch,
            cfg,
        })
    }
}
