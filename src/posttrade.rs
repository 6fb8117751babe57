// ===============================
// src/posttrade.rs
// ===============================
use ahash::AHashMap;
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::domain::{AckStatus, Alert, OrderAck};
use crate::metrics::{ACKS, ALERTS};

pub enum PostTrade {
    Ack(OrderAck),
    Alert(Alert),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolStats {
    pub acks: u64,
    pub fills: u64,
    pub rejects: u64,
    pub cancels: u64,
    pub alerts: u64,
}

#[derive(Debug, Default)]
pub struct Stats {
    by_symbol: AHashMap<String, SymbolStats>,
}

impl Stats {
    pub fn record_ack(&mut self, ack: &OrderAck) {
        let s = self.by_symbol.entry(ack.symbol.clone()).or_default();
        s.acks += 1;
        match ack.status {
            AckStatus::Filled | AckStatus::PartiallyFilled => s.fills += 1,
            AckStatus::Rejected(_) => s.rejects += 1,
            AckStatus::Cancelled => s.cancels += 1,
            AckStatus::Accepted => {}
        }
    }

    pub fn record_alert(&mut self, alert: &Alert) {
        self.by_symbol.entry(alert.symbol.clone()).or_default().alerts += 1;
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolStats> { self.by_symbol.get(symbol) }

    fn log_summary(&self) {
        let mut symbols: Vec<_> = self.by_symbol.iter().collect();
        symbols.sort_by(|a, b| a.0.cmp(b.0));
        for (sym, s) in symbols {
            info!(symbol = %sym, acks = s.acks, fills = s.fills, rejects = s.rejects, cancels = s.cancels, alerts = s.alerts, "post-trade summary");
        }
    }
}

pub async fn run(mut rx: mpsc::Receiver<PostTrade>) {
    let mut stats = Stats::default();
    let mut every = interval(Duration::from_secs(30));
    every.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(PostTrade::Ack(ack)) => {
                        ACKS.with_label_values(&[&ack.symbol, ack.status.label()]).inc();
                        match &ack.status {
                            AckStatus::Accepted => info!(order_id = %ack.order_id, symbol = %ack.symbol, "ACK"),
                            AckStatus::Filled => info!(order_id = %ack.order_id, qty = ?ack.fill_qty, px = ?ack.fill_price, "FILLED"),
                            AckStatus::PartiallyFilled => info!(order_id = %ack.order_id, qty = ?ack.fill_qty, px = ?ack.fill_price, "PARTIAL"),
                            AckStatus::Rejected(r) => warn!(order_id = %ack.order_id, reason = %r, "REJECT"),
                            AckStatus::Cancelled => info!(order_id = %ack.order_id, "CANCELLED"),
                        }
                        stats.record_ack(&ack);
                    }
                    Some(PostTrade::Alert(alert)) => {
                        ALERTS.with_label_values(&[&alert.symbol]).inc();
                        error!(symbol = %alert.symbol, order_id = ?alert.order_id, reason = %alert.reason, "ALERT");
                        stats.record_alert(&alert);
                    }
                    None => {
                        stats.log_summary();
                        break;
                    }
                }
            }
            _ = every.tick() => stats.log_summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(status: AckStatus) -> OrderAck {
        OrderAck { order_id: "S-1".into(), symbol: "S".into(), status, fill_price: None, fill_qty: None, ts_ms: 0 }
    }

    #[test]
    fn counts_per_symbol() {
        let mut st = Stats::default();
        st.record_ack(&ack(AckStatus::Accepted));
        st.record_ack(&ack(AckStatus::PartiallyFilled));
        st.record_ack(&ack(AckStatus::Filled));
        st.record_ack(&ack(AckStatus::Rejected("no".into())));
        st.record_alert(&Alert { symbol: "S".into(), ts_ms: 0, order_id: None, reason: "x".into() });
        assert_eq!(
            st.get("S"),
            Some(&SymbolStats { acks: 4, fills: 2, rejects: 1, cancels: 0, alerts: 1 })
        );
        assert!(st.get("OTHER").is_none());
    }
}
