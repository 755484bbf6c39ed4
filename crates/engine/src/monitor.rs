use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use backtest::{Account, Ledger};
use common::{
    quantity_for_notional, CloseTrigger, Error, ExchangeClient, ExchangePosition, LedgerAction,
    LedgerEntry, LedgerSink, OrderRequest, Position, Result, Side, Signal,
};

/// Balance assumed when the exchange will not report one.
pub const FALLBACK_BALANCE: f64 = 50_000.0;
/// Taker fee assumed when neither config nor exchange provides one.
pub const FALLBACK_FEE_RATE: f64 = 0.0006;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub symbol: String,
    pub tp: f64,
    pub sl: f64,
    /// Notional of each entry in USDT.
    pub position_size_usdt: f64,
    /// Overrides the exchange-reported taker fee when set.
    pub fee_rate: Option<f64>,
    pub poll_interval: Duration,
    /// How long after the triggering signal the monitor keeps running.
    pub signal_validity: Duration,
    /// How many recent orders to inspect when a position disappears.
    pub recent_order_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            tp: 0.05,
            sl: 0.03,
            position_size_usdt: 1000.0,
            fee_rate: None,
            poll_interval: Duration::from_secs(30),
            signal_validity: Duration::from_secs(60 * 60),
            recent_order_limit: 20,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Config("symbol must not be empty".into()));
        }
        if !(self.tp > 0.0) || !(self.sl > 0.0 && self.sl < 1.0) {
            return Err(Error::Config(format!(
                "tp must be positive and sl in (0, 1), got tp={} sl={}",
                self.tp, self.sl
            )));
        }
        if !(self.position_size_usdt > 0.0) {
            return Err(Error::Config("position_size_usdt must be positive".into()));
        }
        if let Some(fee) = self.fee_rate {
            if !(0.0..1.0).contains(&fee) {
                return Err(Error::Config(format!("fee_rate must be in [0, 1), got {fee}")));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Why a monitor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Deadline,
    NoSignal,
    NoPrice,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub exit: ExitReason,
    pub ticks: usize,
    pub failed_ticks: usize,
    pub ledger: Ledger,
    pub final_balance: f64,
    pub open_position: Option<Position>,
}

/// Live counterpart of the offline backtester.
///
/// Polls the exchange, mirrors the single tracked position, and writes each
/// ledger row to the sink the moment it is computed.
pub struct Monitor {
    config: MonitorConfig,
    exchange: Arc<dyn ExchangeClient>,
    sink: Arc<dyn LedgerSink>,
    /// Sorted by timestamp.
    signals: Vec<Signal>,
    account: Account,
    position: Option<Position>,
    ledger: Ledger,
    /// Timestamp of the last signal acted on.
    consumed_until: Option<DateTime<Utc>>,
}

impl Monitor {
    /// Validate `config` and bootstrap the account from the exchange.
    pub async fn start(
        config: MonitorConfig,
        exchange: Arc<dyn ExchangeClient>,
        sink: Arc<dyn LedgerSink>,
        mut signals: Vec<Signal>,
    ) -> Result<Self> {
        config.validate()?;
        signals.sort_by_key(|s| s.timestamp);

        let balance = match exchange.wallet_balance().await {
            Ok(b) if b > 0.0 => b,
            Ok(b) => {
                warn!(balance = b, fallback = FALLBACK_BALANCE, "Non-positive wallet balance");
                FALLBACK_BALANCE
            }
            Err(e) => {
                warn!(error = %e, fallback = FALLBACK_BALANCE, "Wallet balance unavailable");
                FALLBACK_BALANCE
            }
        };
        let fee_rate = match config.fee_rate {
            Some(fee) => fee,
            None => exchange.fee_rate(&config.symbol).await.unwrap_or_else(|e| {
                warn!(error = %e, fallback = FALLBACK_FEE_RATE, "Fee rate unavailable");
                FALLBACK_FEE_RATE
            }),
        };
        info!(symbol = %config.symbol, balance, fee_rate, "Monitor initialised");

        Ok(Self {
            config,
            exchange,
            sink,
            signals,
            account: Account::new(balance, fee_rate),
            position: None,
            ledger: Ledger::new(),
            consumed_until: None,
        })
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Latest signal at or before `now` that has not been acted on yet.
    fn fresh_signal(&self, now: DateTime<Utc>) -> Option<Signal> {
        let latest = self.signals.iter().rev().find(|s| s.timestamp <= now)?;
        match self.consumed_until {
            Some(done) if latest.timestamp <= done => None,
            _ => Some(*latest),
        }
    }

    /// One poll cycle. Returns the rows emitted during it.
    ///
    /// Any exchange error aborts the tick without touching tracked state, so
    /// the next tick starts from the same place.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let symbol = self.config.symbol.clone();
        let price = self.exchange.current_price(&symbol).await?;
        let live = self.exchange.open_position(&symbol).await?;
        let mut rows = Vec::new();

        match (self.position.clone(), live) {
            (Some(tracked), None) => {
                rows.push(self.record_vanished(&tracked, now, price).await?);
                return Ok(rows);
            }
            (Some(tracked), Some(held)) if held.side != tracked.side => {
                rows.push(self.record_vanished(&tracked, now, price).await?);
                self.adopt(held, now);
                return Ok(rows);
            }
            (Some(tracked), Some(held)) => {
                if tracked.stop_loss_hit(price) || tracked.take_profit_hit(price) {
                    warn!(%symbol, price, side = %tracked.side, "Threshold crossed without exchange close");
                    let fill = self
                        .exchange
                        .close_position(&symbol, held.size, tracked.side.exit_order(), price)
                        .await?;
                    ensure_order_id(&fill.order_id)?;
                    rows.push(
                        self.settle(&tracked, now, LedgerAction::AutoClose, fill.fill_price)
                            .await,
                    );
                    return Ok(rows);
                }
                if let Some(p) = self.position.as_mut() {
                    p.size = held.size;
                }
            }
            (None, Some(held)) => self.adopt(held, now),
            (None, None) => {}
        }

        let Some(signal) = self.fresh_signal(now) else {
            return Ok(rows);
        };
        let Some(wanted) = signal.value.side() else {
            self.consumed_until = Some(signal.timestamp);
            return Ok(rows);
        };

        match self.position.clone() {
            None => {
                rows.push(self.enter(wanted, now, price).await?);
            }
            Some(held) if held.side == wanted => {
                debug!(%symbol, side = %wanted, "Signal matches held side");
            }
            Some(held) => {
                info!(%symbol, from = %held.side, to = %wanted, "Direction change");
                let fill = self
                    .exchange
                    .close_position(&symbol, held.size, held.side.exit_order(), price)
                    .await?;
                ensure_order_id(&fill.order_id)?;
                rows.push(
                    self.settle(&held, now, LedgerAction::DirectionChange, fill.fill_price)
                        .await,
                );
                rows.push(self.enter(wanted, now, price).await?);
            }
        }
        self.consumed_until = Some(signal.timestamp);
        Ok(rows)
    }

    fn adopt(&mut self, held: ExchangePosition, now: DateTime<Utc>) {
        info!(
            symbol = %held.symbol,
            side = %held.side,
            size = held.size,
            entry = held.entry_price,
            "Adopting existing exchange position"
        );
        self.position = Some(Position::open(
            held.side,
            held.entry_price,
            now,
            held.size,
            self.config.tp,
            self.config.sl,
        ));
    }

    async fn enter(&mut self, side: Side, now: DateTime<Utc>, price: f64) -> Result<LedgerEntry> {
        let quantity = quantity_for_notional(self.config.position_size_usdt, price);
        let (tp_price, sl_price) = side.thresholds(price, self.config.tp, self.config.sl);
        let order = OrderRequest::market(&self.config.symbol, side.entry_order(), quantity, price)
            .with_brackets(tp_price, sl_price);

        let fill = self.exchange.place_order(&order).await?;
        ensure_order_id(&fill.order_id)?;

        self.account.charge_entry();
        let position = Position::open(
            side,
            fill.fill_price,
            now,
            fill.quantity,
            self.config.tp,
            self.config.sl,
        );
        let entry = self
            .ledger
            .record(
                now,
                LedgerAction::entry_for(side),
                position.entry_prices(),
                fill.quantity,
                self.account.entry_pnl_percent(),
                self.account.balance(),
            )
            .clone();
        info!(
            order_id = %fill.order_id,
            %side,
            price = fill.fill_price,
            qty = fill.quantity,
            tp = tp_price,
            sl = sl_price,
            balance = self.account.balance(),
            "Position opened"
        );
        self.position = Some(position);
        self.persist(&entry).await;
        Ok(entry)
    }

    /// Work out why the exchange no longer holds `tracked` and book the exit.
    async fn record_vanished(
        &mut self,
        tracked: &Position,
        now: DateTime<Utc>,
        market_price: f64,
    ) -> Result<LedgerEntry> {
        let orders = self
            .exchange
            .recent_orders(&self.config.symbol, self.config.recent_order_limit)
            .await?;
        // Orders older than the entry belong to an earlier trade.
        let closing = orders.iter().find(|o| {
            o.reduce_only
                && o.filled
                && o.side == tracked.side.exit_order()
                && o.updated_at >= tracked.entry_time
        });

        let (action, exit_price) = match closing {
            Some(order) => {
                let action = match order.trigger {
                    CloseTrigger::TakeProfit => LedgerAction::Tp,
                    CloseTrigger::StopLoss => LedgerAction::Sl,
                    CloseTrigger::Manual => LedgerAction::ManualClose,
                };
                (action, order.avg_price.unwrap_or(market_price))
            }
            None => {
                warn!(
                    symbol = %self.config.symbol,
                    price = market_price,
                    "Position vanished without a matching close order"
                );
                (LedgerAction::ManualClose, market_price)
            }
        };
        Ok(self.settle(tracked, now, action, exit_price).await)
    }

    /// Book the exit of `position` at `exit_price`, stop tracking it and
    /// persist the row.
    async fn settle(
        &mut self,
        position: &Position,
        now: DateTime<Utc>,
        action: LedgerAction,
        exit_price: f64,
    ) -> LedgerEntry {
        self.position = None;
        let settlement = self.account.settle_exit(position.gross_pnl(exit_price));
        let entry = self
            .ledger
            .record(
                now,
                action,
                position.exit_prices(exit_price),
                position.size,
                settlement.pnl_percent,
                self.account.balance(),
            )
            .clone();
        info!(
            %action,
            side = %position.side,
            entry = position.entry_price,
            exit = exit_price,
            pnl_percent = settlement.pnl_percent,
            balance = self.account.balance(),
            "Position closed"
        );
        self.persist(&entry).await;
        entry
    }

    async fn persist(&self, entry: &LedgerEntry) {
        if let Err(e) = self.sink.append(entry).await {
            error!(action = %entry.action, error = %e, "Failed to persist ledger row");
        }
    }

    /// Poll until the validity window of the current signal closes.
    pub async fn run(&mut self) -> Result<MonitorReport> {
        let now = Utc::now();
        let Some(signal) = self.fresh_signal(now).filter(|s| s.value.is_actionable()) else {
            info!(symbol = %self.config.symbol, "No actionable signal at current time");
            return Ok(self.report(ExitReason::NoSignal, 0, 0));
        };
        if let Err(e) = self.exchange.current_price(&self.config.symbol).await {
            error!(error = %e, "No market price; not trading");
            return Ok(self.report(ExitReason::NoPrice, 0, 0));
        }
        let validity = chrono::Duration::from_std(self.config.signal_validity)
            .map_err(|e| Error::Config(format!("signal_validity out of range: {e}")))?;
        let deadline = signal.timestamp + validity;
        info!(signal = ?signal.value, at = %signal.timestamp, %deadline, "Monitoring");
        self.run_until(deadline).await
    }

    /// Tick every `poll_interval` until `deadline`. Tick failures are logged
    /// and retried on the next tick.
    pub async fn run_until(&mut self, deadline: DateTime<Utc>) -> Result<MonitorReport> {
        let (mut ticks, mut failed) = (0, 0);
        loop {
            let now = Utc::now();
            if now >= deadline {
                break;
            }
            ticks += 1;
            match self.tick(now).await {
                Ok(rows) if !rows.is_empty() => {
                    debug!(rows = rows.len(), "Tick produced ledger rows");
                }
                Ok(_) => {
                    if let Some(p) = &self.position {
                        debug!(side = %p.side, entry = p.entry_price, "Holding");
                    }
                }
                Err(e) => {
                    failed += 1;
                    error!(error = %e, tick = ticks, "Tick failed; retrying next poll");
                }
            }

            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
        info!(ticks, failed, rows = self.ledger.len(), "Monitoring window closed");
        Ok(self.report(ExitReason::Deadline, ticks, failed))
    }

    fn report(&self, exit: ExitReason, ticks: usize, failed_ticks: usize) -> MonitorReport {
        MonitorReport {
            exit,
            ticks,
            failed_ticks,
            ledger: self.ledger.clone(),
            final_balance: self.account.balance(),
            open_position: self.position.clone(),
        }
    }
}

fn ensure_order_id(order_id: &str) -> Result<()> {
    if order_id.is_empty() {
        return Err(Error::ExecutionFailure("exchange returned no order id".into()));
    }
    Ok(())
}

/// Bootstrap a monitor and run it until `deadline`.
pub async fn monitor(
    config: MonitorConfig,
    exchange: Arc<dyn ExchangeClient>,
    sink: Arc<dyn LedgerSink>,
    signals: Vec<Signal>,
    deadline: DateTime<Utc>,
) -> Result<MonitorReport> {
    let mut monitor = Monitor::start(config, exchange, sink, signals).await?;
    monitor.run_until(deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_fee_and_size() {
        let cfg = MonitorConfig {
            fee_rate: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = MonitorConfig {
            position_size_usdt: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn order_id_required() {
        assert!(matches!(ensure_order_id(""), Err(Error::ExecutionFailure(_))));
        assert!(ensure_order_id("abc").is_ok());
    }
}
