use backtest::{run, BacktestConfig, Backtester, PositionState};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Bar, LedgerAction, Signal, SignalValue};

fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap() + Duration::minutes(i as i64)
}

fn series(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            timestamp: ts(i),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 10.0,
        })
        .collect()
}

fn long_at_bar_zero() -> Vec<Signal> {
    vec![Signal::new(ts(0), SignalValue::Long)]
}

fn backtester() -> Backtester {
    Backtester::new(BacktestConfig::default()).unwrap()
}

#[test]
fn flat_prices_leave_position_open() {
    let bars = series(&[100.0; 10]);
    let outcome = backtester().run(&bars, &long_at_bar_zero());

    let rows = outcome.ledger.entries();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, LedgerAction::Buy);
    assert_eq!(rows[0].buy_price, 100.0);
    assert_eq!(rows[0].pnl_percent, 0.0);
    assert!((rows[0].balance - 999.5).abs() < 1e-9);
    assert_eq!(outcome.final_state(), PositionState::Long);
    assert_eq!(outcome.unrealized_pnl_percent, Some(0.0));
}

#[test]
fn take_profit_exit_at_close() {
    let bars = series(&[100.0, 100.0, 100.0, 106.0, 106.0, 106.0]);
    let outcome = backtester().run(&bars, &long_at_bar_zero());

    let rows = outcome.ledger.entries();
    assert_eq!(rows.len(), 2);
    let exit = &rows[1];
    assert_eq!(exit.action, LedgerAction::Tp);
    assert_eq!(exit.timestamp, ts(3));
    assert_eq!((exit.buy_price, exit.sell_price), (100.0, 106.0));
    assert!((exit.pnl_percent - 5.95).abs() < 1e-9);
    assert!((exit.pnl_sum - 5.95).abs() < 1e-9);

    let expected = 999.5 * 1.06 * (1.0 - 0.0005);
    assert!((exit.balance - expected).abs() < 1e-9);
    assert!((outcome.final_balance - expected).abs() < 1e-9);
    assert_eq!(outcome.final_state(), PositionState::Flat);
}

#[test]
fn stop_loss_exit_at_close() {
    let bars = series(&[100.0, 99.0, 96.0, 96.0]);
    let outcome = backtester().run(&bars, &long_at_bar_zero());

    let rows = outcome.ledger.entries();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].action, LedgerAction::Sl);
    assert_eq!(rows[1].timestamp, ts(2));
    assert!((rows[1].pnl_percent + 4.05).abs() < 1e-9);
    assert!(rows[1].balance < 999.5);
}

#[test]
fn no_signals_produce_empty_ledger() {
    let bars = series(&[100.0, 110.0, 90.0, 100.0]);
    let signals: Vec<Signal> = (0..4).map(|i| Signal::new(ts(i), SignalValue::Flat)).collect();
    let outcome = backtester().run(&bars, &signals);

    assert!(outcome.ledger.is_empty());
    assert_eq!(outcome.final_balance, 1000.0);
    assert_eq!(outcome.final_state(), PositionState::Flat);
}

#[test]
fn empty_bars_produce_empty_ledger() {
    let ledger = run(&[], &long_at_bar_zero(), 0.05, 0.03, 1000.0, 0.0005).unwrap();
    assert!(ledger.is_empty());
}

#[test]
fn run_rejects_bad_thresholds() {
    let bars = series(&[100.0]);
    assert!(run(&bars, &[], 0.05, 1.5, 1000.0, 0.0005).is_err());
}

#[test]
fn round_trip_trades_chain_balances() {
    // long tp, then short sl
    let bars = series(&[100.0, 106.0, 100.0, 104.0]);
    let signals = vec![
        Signal::new(ts(0), SignalValue::Long),
        Signal::new(ts(2), SignalValue::Short),
    ];
    let outcome = backtester().run(&bars, &signals);

    let actions: Vec<LedgerAction> = outcome.ledger.entries().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            LedgerAction::Buy,
            LedgerAction::Tp,
            LedgerAction::Sell,
            LedgerAction::Sl
        ]
    );
    let short_exit = &outcome.ledger.entries()[3];
    assert_eq!((short_exit.buy_price, short_exit.sell_price), (104.0, 100.0));
    assert!((short_exit.pnl_percent + 4.05).abs() < 1e-9);
    assert!((short_exit.pnl_sum - (5.95 - 4.05)).abs() < 1e-9);
}

#[test]
fn outcome_serializes_to_json() {
    let bars = series(&[100.0, 106.0]);
    let outcome = backtester().run(&bars, &long_at_bar_zero());
    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["bars_processed"], 2);
    assert_eq!(json["ledger"]["entries"][1]["action"], "tp");
}
