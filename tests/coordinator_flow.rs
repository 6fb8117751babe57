mod common;

use common::*;
use swing_grid_bot::config::ZoneConfig;
use swing_grid_bot::coordinator::{Coordinator, EngineError};
use swing_grid_bot::domain::{AckStatus, Command, Mode, OrderType, Side, TradingStatus};
use swing_grid_bot::orders::{OrderStatus, Purpose};
use swing_grid_bot::stop::BreachKind;
use swing_grid_bot::zone::Zone;

/// Osc zone, one sell at 102.10 for 20 lots resting as TEST-1 (created at ts 3).
fn with_resting_sell() -> Coordinator { resting_sell(cfg()) }

fn resting_sell(cfg: ZoneConfig) -> Coordinator {
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 10_000)).unwrap();
    c.on_tick(&tick(2, 10_250)).unwrap();
    let cmds = c.on_tick(&tick(3, 10_210)).unwrap();
    assert_eq!(submits(&cmds).len(), 1);
    c
}

/// Long 10 @ 98.80 with a stop loss of 2000.
fn long_position(stop_loss: i64) -> Coordinator {
    let mut cfg = cfg();
    cfg.stop_loss = stop_loss;
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 10_000)).unwrap();
    c.on_tick(&tick(2, 9_850)).unwrap();
    let s = submits(&c.on_tick(&tick(3, 9_880)).unwrap());
    let buy = &s[0];
    assert_eq!((buy.side, buy.qty, buy.price), (Side::Buy, 10, 9_880));
    c.on_ack(&ack(&buy.order_id, 3, AckStatus::Filled, Some((10, 9_880)))).unwrap();
    assert_eq!(c.position().qty, 10);
    c
}

#[test]
fn first_tick_locates_zone_and_emits_state() {
    let mut c = Coordinator::new(cfg()).unwrap();
    let cmds = c.on_tick(&tick(1, 10_000)).unwrap();
    assert_eq!(c.zone(), Zone::Osc);
    assert_eq!(cmds.len(), 1);
    match &cmds[0] {
        Command::State(s) => {
            assert_eq!(s.zone, Zone::Osc);
            assert_eq!((s.k, s.g_k), (0, 0));
            assert_eq!(s.trading, TradingStatus::Active);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn configured_start_zone_wins() {
    let mut cfg = cfg();
    cfg.start_zone = Some(Zone::Inc);
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 10_000)).unwrap();
    assert_eq!(c.zone(), Zone::Inc);
}

#[test]
fn grid_sell_after_pullback_then_fill_reanchors() {
    let mut c = Coordinator::new(cfg()).unwrap();
    assert!(submits(&c.on_tick(&tick(1, 10_000)).unwrap()).is_empty());
    assert!(submits(&c.on_tick(&tick(2, 10_250)).unwrap()).is_empty());
    let cmds = c.on_tick(&tick(3, 10_210)).unwrap();
    let s = submits(&cmds);
    assert_eq!(s.len(), 1);
    let o = &s[0];
    assert_eq!(o.order_id, "TEST-1");
    assert_eq!((o.side, o.qty, o.price), (Side::Sell, 20, 10_210));
    assert_eq!((o.order_type, o.mode), (OrderType::Limit, Mode::Patient));
    assert!(matches!(cmds.last(), Some(Command::State(_))));

    assert!(c.on_ack(&ack("TEST-1", 4, AckStatus::Accepted, None)).unwrap().is_empty());
    assert_eq!(c.book().get("TEST-1").unwrap().status, OrderStatus::Accepted);
    c.on_ack(&ack("TEST-1", 5, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    assert_eq!(c.position().qty, -20);
    assert_eq!(c.oscillation().last_order_px, 10_210);
    assert!(submits(&c.on_tick(&tick(6, 10_210)).unwrap()).is_empty());
}

#[test]
fn outstanding_slot_blocks_retrigger() {
    let mut c = with_resting_sell();
    for (ts, px) in [(4, 10_200), (5, 10_190), (6, 10_260), (7, 10_220)] {
        assert!(submits(&c.on_tick(&tick(ts, px)).unwrap()).is_empty());
    }
}

#[test]
fn patient_timeout_escalates_through_cancel_replace() {
    let mut c = with_resting_sell();
    let cmds = c.on_tick(&tick(30_003, 10_210)).unwrap();
    assert_eq!(cancels(&cmds), vec!["TEST-1".to_string()]);
    assert!(submits(&cmds).is_empty());
    assert_eq!(c.book().get("TEST-1").unwrap().status, OrderStatus::CancelPending);

    let cmds = c.on_ack(&ack("TEST-1", 30_004, AckStatus::Cancelled, None)).unwrap();
    let s = submits(&cmds);
    assert_eq!(s.len(), 1);
    assert_eq!(s[0].order_id, "TEST-2");
    assert_eq!((s[0].mode, s[0].qty, s[0].price), (Mode::Accelerated, 20, 10_210));
}

#[test]
fn unconfirmed_cancel_times_out_and_late_fill_still_counts() {
    let mut c = with_resting_sell();
    c.on_tick(&tick(30_003, 10_210)).unwrap();
    let cmds = c.on_tick(&tick(35_003, 10_210)).unwrap();
    let s = submits(&cmds);
    assert_eq!(s.len(), 1);
    assert_eq!(s[0].mode, Mode::Accelerated);
    assert_eq!(c.book().get("TEST-1").unwrap().status, OrderStatus::Cancelled);

    c.on_ack(&ack("TEST-1", 35_010, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    assert_eq!(c.position().qty, -20);
    // the late cancel confirmation changes nothing
    assert!(c.on_ack(&ack("TEST-1", 35_011, AckStatus::Cancelled, None)).unwrap().is_empty());
}

#[test]
fn zone_transition_cancels_grid_orders_and_resets_grid() {
    let mut c = with_resting_sell();
    let cmds = c.on_tick(&tick(4, 10_500)).unwrap();
    assert_eq!(c.zone(), Zone::Dec);
    assert_eq!(cancels(&cmds), vec!["TEST-1".to_string()]);
    let osc = c.oscillation();
    assert_eq!((osc.last_order_px, osc.highest, osc.lowest, osc.k, osc.g_k), (10_500, 10_500, 10_500, 0, 0));

    // cancelled without replacement
    assert!(submits(&c.on_ack(&ack("TEST-1", 5, AckStatus::Cancelled, None)).unwrap()).is_empty());
}

#[test]
fn fill_on_left_zone_order_moves_position_not_grid() {
    let mut c = with_resting_sell();
    c.on_tick(&tick(4, 10_500)).unwrap();
    c.on_ack(&ack("TEST-1", 5, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    assert_eq!(c.position().qty, -20);
    assert_eq!(c.oscillation().last_order_px, 10_500);
}

#[test]
fn far_grid_order_is_cancelled() {
    let mut cfg = cfg();
    cfg.swing_low = 5_000;
    cfg.swing_high = 20_000;
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 12_000)).unwrap();
    c.on_tick(&tick(2, 12_250)).unwrap();
    let s = submits(&c.on_tick(&tick(3, 12_210)).unwrap());
    assert_eq!(s[0].price, 12_210);
    // 12 grids = 1200 ticks
    assert!(cancels(&c.on_tick(&tick(4, 11_010)).unwrap()).is_empty());
    assert_eq!(cancels(&c.on_tick(&tick(5, 11_009)).unwrap()), vec!["TEST-1".to_string()]);
}

#[test]
fn stop_loss_issues_single_panic_exit_then_stops() {
    let mut c = long_position(2_000);
    let cmds = c.on_tick(&tick(4, 9_600)).unwrap();
    let s = submits(&cmds);
    assert_eq!(s.len(), 1);
    let exit = &s[0];
    assert_eq!((exit.side, exit.qty, exit.price), (Side::Sell, 10, 9_599));
    assert_eq!((exit.order_type, exit.mode), (OrderType::Market, Mode::Panic));
    assert_eq!(c.book().get(&exit.order_id).unwrap().purpose, Purpose::Exit);

    for (ts, px) in [(5, 9_590), (6, 9_620), (7, 9_580)] {
        assert!(submits(&c.on_tick(&tick(ts, px)).unwrap()).is_empty());
    }

    c.on_ack(&ack(&exit.order_id, 8, AckStatus::Filled, Some((10, 9_599)))).unwrap();
    assert!(c.position().is_flat());
    assert_eq!(c.trading(), &TradingStatus::Stopped(BreachKind::StopLoss));

    // zone tracking continues, trading does not
    let cmds = c.on_tick(&tick(9, 9_700)).unwrap();
    assert!(submits(&cmds).is_empty());
    match cmds.last() {
        Some(Command::State(st)) => assert_eq!(st.trading, TradingStatus::Stopped(BreachKind::StopLoss)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn profit_take_exits_at_urgent() {
    let mut cfg = cfg();
    cfg.profit_take = 1_000;
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 10_000)).unwrap();
    c.on_tick(&tick(2, 9_850)).unwrap();
    let buy = submits(&c.on_tick(&tick(3, 9_880)).unwrap())[0].clone();
    c.on_ack(&ack(&buy.order_id, 3, AckStatus::Filled, Some((10, 9_880)))).unwrap();
    // +100 ticks * 10 lots
    let s = submits(&c.on_tick(&tick(4, 9_980)).unwrap());
    assert_eq!(s.len(), 1);
    assert_eq!((s[0].side, s[0].mode, s[0].order_type), (Side::Sell, Mode::Urgent, OrderType::Limit));
}

#[test]
fn rejected_grid_order_retries_up_then_alerts() {
    let mut c = with_resting_sell();
    let r1 = c.on_ack(&ack("TEST-1", 4, AckStatus::Rejected("busy".into()), None)).unwrap();
    let s1 = submits(&r1);
    assert_eq!((s1[0].order_id.as_str(), s1[0].mode, s1[0].price), ("TEST-2", Mode::Accelerated, 10_210));

    let r2 = c.on_ack(&ack("TEST-2", 5, AckStatus::Rejected("busy".into()), None)).unwrap();
    let s2 = submits(&r2);
    assert_eq!((s2[0].order_id.as_str(), s2[0].mode, s2[0].price), ("TEST-3", Mode::Urgent, 10_209));

    let r3 = c.on_ack(&ack("TEST-3", 6, AckStatus::Rejected("busy".into()), None)).unwrap();
    assert!(submits(&r3).is_empty());
    assert_eq!(alerts(&r3), 1);
    assert_eq!(c.trading(), &TradingStatus::Active);
}

#[test]
fn exit_is_reissued_after_rejections_run_out() {
    let mut c = long_position(2_000);
    let mut id = submits(&c.on_tick(&tick(4, 9_600)).unwrap())[0].order_id.clone();
    for ts in 5..7 {
        let cmds = c.on_ack(&ack(&id, ts, AckStatus::Rejected("no liquidity".into()), None)).unwrap();
        let s = submits(&cmds);
        assert_eq!(s.len(), 1);
        assert_eq!((s[0].mode, s[0].qty), (Mode::Panic, 10));
        id = s[0].order_id.clone();
    }
    let cmds = c.on_ack(&ack(&id, 7, AckStatus::Rejected("no liquidity".into()), None)).unwrap();
    assert_eq!(alerts(&cmds), 1);
    assert!(submits(&cmds).is_empty());
    assert_eq!(c.trading(), &TradingStatus::Active);

    // next tick asks again, with a fresh reject budget
    let s = submits(&c.on_tick(&tick(8, 9_500)).unwrap());
    assert_eq!(s.len(), 1);
    assert_eq!((s[0].side, s[0].qty, s[0].mode), (Side::Sell, 10, Mode::Panic));
    let cmds = c.on_ack(&ack(&s[0].order_id, 9, AckStatus::Rejected("no liquidity".into()), None)).unwrap();
    assert_eq!(alerts(&cmds), 0);
    let retry = submits(&cmds);
    assert_eq!(retry.len(), 1);

    c.on_ack(&ack(&retry[0].order_id, 10, AckStatus::Filled, Some((10, 9_499)))).unwrap();
    assert!(c.position().is_flat());
    assert_eq!(c.trading(), &TradingStatus::Stopped(BreachKind::StopLoss));
}

#[test]
fn stale_tick_is_rejected_without_side_effects() {
    let mut c = Coordinator::new(cfg()).unwrap();
    c.on_tick(&tick(10, 10_000)).unwrap();
    let before = c.snapshot();
    assert_eq!(c.on_tick(&tick(5, 10_500)), Err(EngineError::StaleData { ts: 5, last: 10 }));
    assert_eq!(c.snapshot(), before);
    assert!(c.on_tick(&tick(10, 10_000)).is_ok());
}

#[test]
fn overfill_halts_the_instrument() {
    let mut c = with_resting_sell();
    let err = c.on_ack(&ack("TEST-1", 4, AckStatus::Filled, Some((25, 10_210)))).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)));
    assert!(c.is_halted());
    assert_eq!(c.on_tick(&tick(5, 10_000)), Err(EngineError::Halted));
    assert_eq!(c.on_ack(&ack("TEST-1", 6, AckStatus::Cancelled, None)), Err(EngineError::Halted));
}

fn capped(cap: i64) -> Coordinator {
    let mut cfg = cfg();
    cfg.max_position = Some(cap);
    let mut c = Coordinator::new(cfg).unwrap();
    c.on_tick(&tick(1, 10_000)).unwrap();
    c.on_tick(&tick(2, 10_250)).unwrap();
    let s = submits(&c.on_tick(&tick(3, 10_210)).unwrap());
    assert_eq!(s[0].qty, 20);
    c
}

#[test]
fn grid_respects_position_cap() {
    let mut c = capped(20);
    c.on_ack(&ack("TEST-1", 4, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    c.on_tick(&tick(5, 10_400)).unwrap();
    // a sell would trigger here, but -20 leaves no room
    assert!(submits(&c.on_tick(&tick(6, 10_360)).unwrap()).is_empty());
}

#[test]
fn fill_beyond_cap_halts() {
    let mut c = capped(20);
    c.on_tick(&tick(30_003, 10_210)).unwrap();
    let s = submits(&c.on_tick(&tick(35_003, 10_210)).unwrap());
    assert_eq!(s[0].order_id, "TEST-2");
    c.on_ack(&ack("TEST-2", 35_004, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    // the locally cancelled original fills after all
    let err = c.on_ack(&ack("TEST-1", 35_005, AckStatus::Filled, Some((20, 10_210)))).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation(_)));
    assert!(c.is_halted());
}

#[test]
fn unknown_and_duplicate_acks_are_ignored() {
    let mut c = with_resting_sell();
    assert!(c.on_ack(&ack("NOPE-9", 4, AckStatus::Cancelled, None)).unwrap().is_empty());
    c.on_ack(&ack("TEST-1", 5, AckStatus::PartiallyFilled, Some((10, 10_210)))).unwrap();
    c.on_ack(&ack("TEST-1", 6, AckStatus::PartiallyFilled, Some((10, 10_210)))).unwrap();
    // out of order: an older report after a newer one
    c.on_ack(&ack("TEST-1", 7, AckStatus::PartiallyFilled, Some((4, 10_210)))).unwrap();
    assert_eq!(c.position().qty, -10);
    assert_eq!(c.book().get("TEST-1").unwrap().status, OrderStatus::PartiallyFilled);
}

#[test]
fn snapshot_restore_replays_identically() {
    let path: Vec<i64> = vec![
        10_000, 10_250, 10_210, 10_150, 10_320, 10_260, 9_950, 9_800, 9_840, 10_050, 10_500, 10_700, 10_640,
        10_300, 10_350, 9_700, 9_600, 9_640, 9_900,
    ];
    let mut live = Coordinator::new(cfg()).unwrap();
    for (i, px) in path.iter().take(8).enumerate() {
        drive(&mut live, &tick(i as i64 * 1_000, *px));
    }

    let json = serde_json::to_string(&live.snapshot()).unwrap();
    let mut restored = Coordinator::restore(cfg(), serde_json::from_str(&json).unwrap()).unwrap();

    for (i, px) in path.iter().enumerate().skip(8) {
        let t = tick(i as i64 * 1_000, *px);
        assert_eq!(drive(&mut live, &t), drive(&mut restored, &t));
    }
    assert_eq!(live.snapshot(), restored.snapshot());
}

#[test]
fn restore_rejects_other_symbol() {
    let c = Coordinator::new(cfg()).unwrap();
    let mut other = cfg();
    other.symbol = "OTHER".into();
    assert!(Coordinator::restore(other, c.snapshot()).is_err());
}

#[test]
fn late_fill_from_earlier_zone_visit_leaves_grid_alone() {
    let mut c = with_resting_sell();
    // Osc -> Dec, TEST-1 cancel goes out but is never confirmed
    c.on_tick(&tick(4, 10_500)).unwrap();
    assert_eq!(c.zone(), Zone::Dec);
    // and back into Osc
    c.on_tick(&tick(5, 10_100)).unwrap();
    assert_eq!(c.zone(), Zone::Osc);
    assert_eq!(c.oscillation().last_order_px, 10_100);

    c.on_ack(&ack("TEST-1", 6, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    assert_eq!(c.position().qty, -20);
    let osc = c.oscillation();
    assert_eq!(osc.last_order_px, 10_100);
    assert!(osc.ledger.is_flat());
    assert_eq!(osc.g_k, 0);
}

#[test]
fn fill_without_price_uses_order_price() {
    let mut c = with_resting_sell();
    let mut partial = ack("TEST-1", 4, AckStatus::PartiallyFilled, Some((10, 0)));
    partial.fill_price = None;
    c.on_ack(&partial).unwrap();
    assert_eq!(c.position().qty, -10);
    assert_eq!(c.position().avg_px, 10_210);
    let o = c.book().get("TEST-1").unwrap();
    assert_eq!((o.filled_qty, o.status), (10, OrderStatus::PartiallyFilled));
}

#[test]
fn fill_for_untracked_order_raises_alert() {
    let mut c = with_resting_sell();
    let cmds = c.on_ack(&ack("NOPE-9", 4, AckStatus::Filled, Some((5, 1)))).unwrap();
    assert_eq!(alerts(&cmds), 1);
    assert_eq!(c.position().qty, 0);
}

#[test]
fn fill_after_order_was_pruned_raises_alert() {
    let mut c = with_resting_sell();
    c.on_tick(&tick(30_003, 10_210)).unwrap();
    // cancel never confirmed: closed locally, replaced by TEST-2
    c.on_tick(&tick(35_003, 10_210)).unwrap();
    c.on_tick(&tick(635_003, 10_210)).unwrap();
    assert!(c.book().get("TEST-1").is_none());

    let cmds = c.on_ack(&ack("TEST-1", 635_004, AckStatus::Filled, Some((20, 10_210)))).unwrap();
    assert_eq!(alerts(&cmds), 1);
}

#[test]
fn drift_away_from_resting_order_reprices_one_mode_up() {
    let mut cfg = cfg();
    cfg.reprice_ticks = Some(3);
    let mut c = resting_sell(cfg);
    assert!(cancels(&c.on_tick(&tick(4, 10_208)).unwrap()).is_empty());
    assert_eq!(cancels(&c.on_tick(&tick(5, 10_207)).unwrap()), vec!["TEST-1".to_string()]);

    let s = submits(&c.on_ack(&ack("TEST-1", 6, AckStatus::Cancelled, None)).unwrap());
    assert_eq!(s.len(), 1);
    // max(last - payup, mid) = max(10_206, 10_207)
    assert_eq!((s[0].order_id.as_str(), s[0].mode, s[0].price), ("TEST-2", Mode::Accelerated, 10_207));
}

#[test]
fn grid_order_past_slippage_bound_is_abandoned() {
    let mut cfg = cfg();
    cfg.max_slippage_ticks = Some(10);
    let mut c = resting_sell(cfg);
    assert!(cancels(&c.on_tick(&tick(4, 10_200)).unwrap()).is_empty());
    let cmds = c.on_tick(&tick(5, 10_199)).unwrap();
    assert_eq!(cancels(&cmds), vec!["TEST-1".to_string()]);
    assert!(submits(&cmds).is_empty());

    // no replacement once the cancel is confirmed
    assert!(submits(&c.on_ack(&ack("TEST-1", 6, AckStatus::Cancelled, None)).unwrap()).is_empty());
    assert_eq!(c.book().get("TEST-1").unwrap().status, OrderStatus::Cancelled);
}

#[test]
fn timed_out_grid_order_is_not_replaced_past_slippage_bound() {
    let mut cfg = cfg();
    cfg.max_slippage_ticks = Some(10);
    let mut c = resting_sell(cfg);
    assert_eq!(cancels(&c.on_tick(&tick(30_003, 10_205)).unwrap()), vec!["TEST-1".to_string()]);
    // the market runs off before the cancel is confirmed
    c.on_tick(&tick(30_004, 10_195)).unwrap();
    assert!(submits(&c.on_ack(&ack("TEST-1", 30_005, AckStatus::Cancelled, None)).unwrap()).is_empty());
}
