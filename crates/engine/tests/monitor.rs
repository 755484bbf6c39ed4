use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use common::{
    Bar, CloseTrigger, Error, ExchangeClient, ExchangePosition, Fill, Interval, LedgerAction,
    LedgerEntry, LedgerSink, OrderRecord, OrderRequest, OrderSide, Result, Side, Signal,
    SignalValue,
};
use engine::{ExitReason, Monitor, MonitorConfig};
use paper::PaperClient;

const SYMBOL: &str = "BTCUSDT";

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn config() -> MonitorConfig {
    MonitorConfig {
        symbol: SYMBOL.to_string(),
        tp: 0.05,
        sl: 0.03,
        position_size_usdt: 1000.0,
        fee_rate: Some(0.0005),
        poll_interval: Duration::from_millis(5),
        signal_validity: Duration::from_secs(3600),
        recent_order_limit: 20,
    }
}

#[derive(Default)]
struct MemorySink {
    rows: Mutex<Vec<LedgerEntry>>,
}

impl MemorySink {
    fn actions(&self) -> Vec<LedgerAction> {
        self.rows.lock().unwrap().iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl LedgerSink for MemorySink {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        self.rows.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

struct BrokenSink;

#[async_trait]
impl LedgerSink for BrokenSink {
    async fn append(&self, _entry: &LedgerEntry) -> Result<()> {
        Err(Error::Other("disk full".into()))
    }
}

/// Exchange double whose responses are set directly by the test.
#[derive(Default)]
struct Scripted {
    price: Mutex<Option<f64>>,
    position: Mutex<Option<ExchangePosition>>,
    orders: Mutex<Vec<OrderRecord>>,
    blank_order_ids: Mutex<bool>,
    /// Closes go through but the venue reports no fill price.
    unpriced_closes: Mutex<bool>,
    closes: Mutex<usize>,
}

impl Scripted {
    fn set_price(&self, p: f64) {
        *self.price.lock().unwrap() = Some(p);
    }

    fn set_position(&self, side: Side, size: f64, entry_price: f64) {
        *self.position.lock().unwrap() = Some(ExchangePosition {
            symbol: SYMBOL.into(),
            side,
            size,
            entry_price,
        });
    }

    fn fill(&self, side: OrderSide, quantity: f64) -> Result<Fill> {
        let price = self.price.lock().unwrap().ok_or_else(|| Error::Http("timeout".into()))?;
        let order_id = if *self.blank_order_ids.lock().unwrap() {
            String::new()
        } else {
            "scripted-1".to_string()
        };
        Ok(Fill {
            order_id,
            symbol: SYMBOL.into(),
            side,
            fill_price: price,
            quantity,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeClient for Scripted {
    async fn fetch_bars(&self, _: &str, _: Interval, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<Bar>> {
        Ok(Vec::new())
    }

    async fn current_price(&self, _: &str) -> Result<f64> {
        self.price
            .lock()
            .unwrap()
            .ok_or_else(|| Error::Http("connection reset".into()))
    }

    async fn open_position(&self, _: &str) -> Result<Option<ExchangePosition>> {
        Ok(self.position.lock().unwrap().clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        let fill = self.fill(order.side, order.quantity)?;
        if !fill.order_id.is_empty() {
            self.set_position(Side::from(order.side), order.quantity, fill.fill_price);
        }
        Ok(fill)
    }

    async fn close_position(
        &self,
        _: &str,
        quantity: f64,
        side: OrderSide,
        reference_price: f64,
    ) -> Result<Fill> {
        *self.closes.lock().unwrap() += 1;
        let mut fill = self.fill(side, quantity)?;
        if *self.unpriced_closes.lock().unwrap() {
            fill.fill_price = reference_price;
        }
        if !fill.order_id.is_empty() {
            *self.position.lock().unwrap() = None;
        }
        Ok(fill)
    }

    async fn recent_orders(&self, _: &str, limit: usize) -> Result<Vec<OrderRecord>> {
        Ok(self.orders.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn wallet_balance(&self) -> Result<f64> {
        Err(Error::Exchange("demo account has no wallet endpoint".into()))
    }

    async fn fee_rate(&self, _: &str) -> Result<f64> {
        Ok(0.001)
    }
}

async fn paper_monitor(signals: Vec<Signal>) -> (Arc<PaperClient>, Arc<MemorySink>, Monitor) {
    let paper = Arc::new(PaperClient::new(10_000.0, 0.0));
    paper.update_price(SYMBOL, 100.0).await;
    let sink = Arc::new(MemorySink::default());
    let monitor = Monitor::start(config(), paper.clone(), sink.clone(), signals)
        .await
        .unwrap();
    (paper, sink, monitor)
}

#[tokio::test]
async fn direction_change_emits_two_rows_in_one_tick() {
    let signals = vec![
        Signal::new(t(0), SignalValue::Long),
        Signal::new(t(60), SignalValue::Short),
    ];
    let (paper, sink, mut monitor) = paper_monitor(signals).await;

    let opened = monitor.tick(t(10)).await.unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].action, LedgerAction::Buy);
    assert!((opened[0].pnl_percent + 0.05).abs() < 1e-9);

    paper.update_price(SYMBOL, 101.0).await;
    let flipped = monitor.tick(t(70)).await.unwrap();
    let actions: Vec<LedgerAction> = flipped.iter().map(|r| r.action).collect();
    assert_eq!(actions, vec![LedgerAction::DirectionChange, LedgerAction::Sell]);
    assert_eq!((flipped[0].buy_price, flipped[0].sell_price), (100.0, 101.0));
    assert!((flipped[0].pnl_percent - (1.0 - 0.05)).abs() < 1e-9);

    let held = paper.open_position(SYMBOL).await.unwrap().unwrap();
    assert_eq!(held.side, Side::Short);
    assert_eq!(monitor.position().unwrap().side, Side::Short);
    assert_eq!(sink.rows.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn consumed_signal_is_not_acted_on_twice() {
    let (_paper, sink, mut monitor) =
        paper_monitor(vec![Signal::new(t(0), SignalValue::Long)]).await;

    assert_eq!(monitor.tick(t(5)).await.unwrap().len(), 1);
    assert!(monitor.tick(t(35)).await.unwrap().is_empty());
    assert!(monitor.tick(t(65)).await.unwrap().is_empty());
    assert_eq!(sink.actions(), vec![LedgerAction::Buy]);
}

#[tokio::test]
async fn exchange_take_profit_is_classified_from_order_history() {
    let (paper, sink, mut monitor) =
        paper_monitor(vec![Signal::new(t(0), SignalValue::Long)]).await;
    monitor.tick(t(1)).await.unwrap();

    assert_eq!(
        paper.update_price(SYMBOL, 106.0).await,
        Some(CloseTrigger::TakeProfit)
    );
    let rows = monitor.tick(t(31)).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, LedgerAction::Tp);
    assert_eq!(rows[0].sell_price, 106.0);
    assert!((rows[0].pnl_percent - 5.95).abs() < 1e-9);
    assert!(monitor.position().is_none());
    assert_eq!(sink.actions(), vec![LedgerAction::Buy, LedgerAction::Tp]);
}

#[tokio::test]
async fn exchange_stop_loss_on_short() {
    let (paper, _sink, mut monitor) =
        paper_monitor(vec![Signal::new(t(0), SignalValue::Short)]).await;
    monitor.tick(t(1)).await.unwrap();

    paper.update_price(SYMBOL, 104.0).await;
    let rows = monitor.tick(t(31)).await.unwrap();
    assert_eq!(rows[0].action, LedgerAction::Sl);
    assert_eq!((rows[0].buy_price, rows[0].sell_price), (104.0, 100.0));
    assert!((rows[0].pnl_percent + 4.05).abs() < 1e-9);
}

#[tokio::test]
async fn missing_order_id_abandons_entry_without_row() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    *exchange.blank_order_ids.lock().unwrap() = true;
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();

    let err = monitor.tick(t(1)).await.unwrap_err();
    assert!(matches!(err, Error::ExecutionFailure(_)));
    assert!(monitor.ledger().is_empty());
    assert!(monitor.position().is_none());

    // The signal is still fresh, so the next tick retries.
    *exchange.blank_order_ids.lock().unwrap() = false;
    assert_eq!(monitor.tick(t(31)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn transient_error_skips_tick_and_keeps_state() {
    let exchange = Arc::new(Scripted::default());
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();

    assert!(matches!(monitor.tick(t(1)).await, Err(Error::Http(_))));
    assert!(sink.actions().is_empty());

    exchange.set_price(100.0);
    assert_eq!(monitor.tick(t(31)).await.unwrap()[0].action, LedgerAction::Buy);
}

#[tokio::test]
async fn unclassifiable_disappearance_is_manual_close_at_market() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();
    monitor.tick(t(1)).await.unwrap();

    *exchange.position.lock().unwrap() = None;
    exchange.set_price(99.0);
    let rows = monitor.tick(t(31)).await.unwrap();
    assert_eq!(rows[0].action, LedgerAction::ManualClose);
    assert_eq!(rows[0].sell_price, 99.0);
}

#[tokio::test]
async fn close_order_from_an_earlier_trade_is_ignored() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    exchange.orders.lock().unwrap().push(OrderRecord {
        order_id: "old-tp".into(),
        symbol: SYMBOL.into(),
        side: OrderSide::Sell,
        quantity: 10.0,
        avg_price: Some(150.0),
        reduce_only: true,
        filled: true,
        trigger: CloseTrigger::TakeProfit,
        updated_at: t(-86_400),
    });
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();
    monitor.tick(t(1)).await.unwrap();

    *exchange.position.lock().unwrap() = None;
    exchange.set_price(99.0);
    let rows = monitor.tick(t(31)).await.unwrap();
    assert_eq!(rows[0].action, LedgerAction::ManualClose);
    assert_eq!(rows[0].sell_price, 99.0);
    assert!((rows[0].pnl_percent + 1.05).abs() < 1e-9);
}

#[tokio::test]
async fn local_threshold_breach_closes_with_auto_close() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();
    monitor.tick(t(1)).await.unwrap();

    // Exchange bracket did not fire; the position is still reported open.
    exchange.set_price(96.5);
    let rows = monitor.tick(t(31)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, LedgerAction::AutoClose);
    assert_eq!(*exchange.closes.lock().unwrap(), 1);
    assert!(monitor.position().is_none());
}

#[tokio::test]
async fn existing_exchange_position_is_adopted_without_row() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    exchange.set_position(Side::Long, 0.5, 98.0);
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();

    assert!(monitor.tick(t(1)).await.unwrap().is_empty());
    let held = monitor.position().unwrap();
    assert_eq!(held.entry_price, 98.0);
    assert_eq!(held.size, 0.5);
}

#[tokio::test]
async fn balance_and_fee_fall_back_when_exchange_is_silent() {
    let exchange = Arc::new(Scripted::default());
    let cfg = MonitorConfig {
        fee_rate: None,
        ..config()
    };
    let monitor = Monitor::start(cfg, exchange, Arc::new(MemorySink::default()), Vec::new())
        .await
        .unwrap();
    assert_eq!(monitor.account().balance(), 50_000.0);
    // Scripted reports 0.1%.
    assert_eq!(monitor.account().fee_rate(), 0.001);
}

#[tokio::test]
async fn failed_persist_keeps_row_in_memory() {
    let paper = Arc::new(PaperClient::new(10_000.0, 0.0));
    paper.update_price(SYMBOL, 100.0).await;
    let mut monitor = Monitor::start(
        config(),
        paper,
        Arc::new(BrokenSink),
        vec![Signal::new(t(0), SignalValue::Long)],
    )
    .await
    .unwrap();

    assert_eq!(monitor.tick(t(1)).await.unwrap().len(), 1);
    assert_eq!(monitor.ledger().len(), 1);
}

#[tokio::test]
async fn run_without_signal_returns_early() {
    let (_paper, sink, mut monitor) = paper_monitor(Vec::new()).await;
    let report = monitor.run().await.unwrap();
    assert_eq!(report.exit, ExitReason::NoSignal);
    assert_eq!(report.ticks, 0);
    assert!(sink.actions().is_empty());
}

#[tokio::test]
async fn run_until_polls_until_deadline() {
    let (_paper, sink, mut monitor) =
        paper_monitor(vec![Signal::new(Utc::now(), SignalValue::Long)]).await;
    let deadline = Utc::now() + chrono::Duration::milliseconds(60);

    let report = monitor.run_until(deadline).await.unwrap();
    assert_eq!(report.exit, ExitReason::Deadline);
    assert!(report.ticks >= 1);
    assert_eq!(report.failed_ticks, 0);
    assert_eq!(sink.actions(), vec![LedgerAction::Buy]);
    assert!(report.open_position.is_some());
}

#[tokio::test]
async fn paper_run_fed_from_a_ticker_trades_on_first_tick() {
    let ticker = Arc::new(Scripted::default());
    ticker.set_price(100.0);
    let paper = Arc::new(PaperClient::new(10_000.0, 0.0));
    let feed = paper
        .follow_prices(ticker.clone(), SYMBOL, Duration::from_millis(5))
        .await
        .unwrap();

    let sink = Arc::new(MemorySink::default());
    let cfg = MonitorConfig {
        signal_validity: Duration::from_millis(80),
        ..config()
    };
    let mut monitor = Monitor::start(
        cfg,
        paper.clone(),
        sink.clone(),
        vec![Signal::new(Utc::now(), SignalValue::Long)],
    )
    .await
    .unwrap();

    let report = monitor.run().await.unwrap();
    feed.abort();
    assert_eq!(report.exit, ExitReason::Deadline);
    assert!(report.ticks >= 1);
    assert_eq!(sink.actions(), vec![LedgerAction::Buy]);
}

#[tokio::test]
async fn direction_change_is_booked_even_without_a_fill_price() {
    let exchange = Arc::new(Scripted::default());
    exchange.set_price(100.0);
    let sink = Arc::new(MemorySink::default());
    let mut monitor = Monitor::start(
        config(),
        exchange.clone(),
        sink.clone(),
        vec![
            Signal::new(t(0), SignalValue::Long),
            Signal::new(t(30), SignalValue::Short),
        ],
    )
    .await
    .unwrap();
    monitor.tick(t(1)).await.unwrap();

    *exchange.unpriced_closes.lock().unwrap() = true;
    exchange.set_price(102.0);
    let rows = monitor.tick(t(31)).await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].action, LedgerAction::DirectionChange);
    assert_eq!(rows[0].sell_price, 102.0);
    assert_eq!(rows[1].action, LedgerAction::Sell);
    assert_eq!(
        sink.actions(),
        vec![LedgerAction::Buy, LedgerAction::DirectionChange, LedgerAction::Sell]
    );
}
