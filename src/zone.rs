// ===============================
// src/zone.rs (price zone state machine)
// ===============================
//
// Zones from low to high price:
//
//   NetLong | Inc | Osc | Dec | NetShort
//           ^swing_low        ^swing_high
//
// The swing range is split into three equal sub-zones (Dec takes the rounding
// remainder). The Net zones are open-ended on their outer side.
//
// A zone is left only when price is beyond its bound by strictly more than one
// grid step. A gap across several zones is walked one zone at a time.
//
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone { NetLong, Inc, Osc, Dec, NetShort }

impl Zone {
    pub const ALL: [Zone; 5] = [Zone::NetLong, Zone::Inc, Zone::Osc, Zone::Dec, Zone::NetShort];

    pub fn index(self) -> usize { self as usize }

    pub fn above(self) -> Option<Zone> { Zone::ALL.get(self.index() + 1).copied() }

    pub fn below(self) -> Option<Zone> { self.index().checked_sub(1).map(|i| Zone::ALL[i]) }

    /// Net zones hold inventory; no grid oscillation runs there.
    pub fn is_net(self) -> bool { matches!(self, Zone::NetLong | Zone::NetShort) }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::NetLong => "net_long",
            Zone::Inc => "inc",
            Zone::Osc => "osc",
            Zone::Dec => "dec",
            Zone::NetShort => "net_short",
        }
    }

    pub fn parse(s: &str) -> Option<Zone> {
        match s.trim().to_ascii_lowercase().as_str() {
            "net_long" | "netlong" | "net-long" => Some(Zone::NetLong),
            "inc" => Some(Zone::Inc),
            "osc" => Some(Zone::Osc),
            "dec" => Some(Zone::Dec),
            "net_short" | "netshort" | "net-short" => Some(Zone::NetShort),
            _ => None,
        }
    }
}

/// Price bounds of one zone in ticks; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneBounds { pub low: Option<i64>, pub high: Option<i64> }

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneTable {
    bounds: [ZoneBounds; 5],
    grid_step: i64,
}

impl ZoneTable {
    /// Caller guarantees `swing_low < swing_high` and `grid_step > 0` (see `ZoneConfig::validate`).
    pub fn new(swing_low: i64, swing_high: i64, grid_step: i64) -> Self {
        let width = (swing_high - swing_low) / 3;
        let inc_high = swing_low + width;
        let osc_high = swing_low + 2 * width;
        let bounds = [
            ZoneBounds { low: None, high: Some(swing_low) },
            ZoneBounds { low: Some(swing_low), high: Some(inc_high) },
            ZoneBounds { low: Some(inc_high), high: Some(osc_high) },
            ZoneBounds { low: Some(osc_high), high: Some(swing_high) },
            ZoneBounds { low: Some(swing_high), high: None },
        ];
        Self { bounds, grid_step }
    }

    pub fn bounds(&self, zone: Zone) -> ZoneBounds { self.bounds[zone.index()] }

    pub fn grid_step(&self) -> i64 { self.grid_step }

    /// Zone containing `price`. Inner zones are half-open `[low, high)`,
    /// except Dec which includes `swing_high`.
    pub fn locate(&self, price: i64) -> Zone {
        for zone in [Zone::NetLong, Zone::Inc, Zone::Osc] {
            if let Some(high) = self.bounds(zone).high {
                if price < high {
                    return zone;
                }
            }
        }
        match self.bounds(Zone::Dec).high {
            Some(high) if price > high => Zone::NetShort,
            _ => Zone::Dec,
        }
    }

    /// One hysteresis step from `zone`, if `price` clears a bound by more than a grid step.
    pub fn step(&self, zone: Zone, price: i64) -> Option<Zone> {
        let b = self.bounds(zone);
        if let Some(high) = b.high {
            if price > high + self.grid_step {
                return zone.above();
            }
        }
        if let Some(low) = b.low {
            if price < low - self.grid_step {
                return zone.below();
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTransition { pub from: Zone, pub to: Zone, pub price: i64 }

#[derive(Debug, Clone)]
pub struct ZoneMachine {
    table: ZoneTable,
    active: Zone,
}

impl ZoneMachine {
    pub fn new(table: ZoneTable, initial: Zone) -> Self { Self { table, active: initial } }

    pub fn active(&self) -> Zone { self.active }

    pub fn table(&self) -> &ZoneTable { &self.table }

    /// Feed the latest traded price. Returns every single-zone step taken, in order.
    /// Each step moves in the same direction, so the walk always terminates.
    pub fn on_price(&mut self, price: i64) -> Vec<ZoneTransition> {
        let mut steps = Vec::new();
        while let Some(next) = self.table.step(self.active, price) {
            steps.push(ZoneTransition { from: self.active, to: next, price });
            self.active = next;
        }
        steps
    }
}
