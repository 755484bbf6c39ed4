use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Bar, Error, LedgerAction, Position, Result, Side, Signal};

use crate::accounting::Account;
use crate::ledger::Ledger;
use crate::merge::{merge, MergedBar};

/// Parameters of an offline run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Take-profit as a fraction of the entry price.
    pub tp: f64,
    /// Stop-loss as a fraction of the entry price.
    pub sl: f64,
    pub initial_balance: f64,
    pub fee_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            tp: 0.05,
            sl: 0.03,
            initial_balance: 1000.0,
            fee_rate: 0.0005,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tp > 0.0) {
            return Err(Error::Config(format!("tp must be positive, got {}", self.tp)));
        }
        if !(self.sl > 0.0 && self.sl < 1.0) {
            return Err(Error::Config(format!(
                "sl must be in (0, 1), got {}",
                self.sl
            )));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(Error::Config(format!(
                "fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        if !(self.initial_balance > 0.0) {
            return Err(Error::Config(format!(
                "initial_balance must be positive, got {}",
                self.initial_balance
            )));
        }
        Ok(())
    }
}

/// State of the single-position machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

impl From<Option<&Position>> for PositionState {
    fn from(position: Option<&Position>) -> Self {
        match position.map(|p| p.side) {
            None => PositionState::Flat,
            Some(Side::Long) => PositionState::Long,
            Some(Side::Short) => PositionState::Short,
        }
    }
}

/// Everything an offline run produces.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutcome {
    pub ledger: Ledger,
    pub final_balance: f64,
    /// Position still open when the series ran out. It is reported, not closed.
    pub open_position: Option<Position>,
    /// Gross move of the open position at the last close, in percentage points.
    pub unrealized_pnl_percent: Option<f64>,
    pub bars_processed: usize,
}

impl BacktestOutcome {
    pub fn final_state(&self) -> PositionState {
        PositionState::from(self.open_position.as_ref())
    }
}

/// Offline replay of the position state machine over a merged series.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    /// Fails with `Error::Config` when the thresholds or account are invalid.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, bars: &[Bar], signals: &[Signal]) -> BacktestOutcome {
        if bars.is_empty() {
            debug!("no bars to replay; ledger stays empty");
        }
        self.run_merged(&merge(bars, signals))
    }

    /// Walk `series` bar by bar. At most one event is emitted per bar.
    pub fn run_merged(&self, series: &[MergedBar]) -> BacktestOutcome {
        let BacktestConfig { tp, sl, .. } = self.config;
        let mut account = Account::new(self.config.initial_balance, self.config.fee_rate);
        let mut ledger = Ledger::new();
        let mut position: Option<Position> = None;

        for row in series {
            let close = row.bar.close;
            let ts = row.bar.timestamp;

            match position.take() {
                None => {
                    let Some(side) = row.signal.side() else {
                        continue;
                    };
                    if account.is_depleted() {
                        debug!(%ts, "balance exhausted; ignoring entry signal");
                        continue;
                    }
                    account.charge_entry();
                    let size = account.balance() / close;
                    let opened = Position::open(side, close, ts, size, tp, sl);
                    ledger.record(
                        ts,
                        LedgerAction::entry_for(side),
                        opened.entry_prices(),
                        size,
                        0.0,
                        account.balance(),
                    );
                    debug!(%ts, %side, price = close, balance = account.balance(), "position opened");
                    position = Some(opened);
                }
                Some(open) => {
                    if !(open.stop_loss_hit(close) || open.take_profit_hit(close)) {
                        position = Some(open);
                        continue;
                    }
                    let settlement = account.settle_exit(open.gross_pnl(close));
                    let action = if settlement.gross_pnl > 0.0 {
                        LedgerAction::Tp
                    } else {
                        LedgerAction::Sl
                    };
                    ledger.record(
                        ts,
                        action,
                        open.exit_prices(close),
                        open.size,
                        settlement.pnl_percent,
                        account.balance(),
                    );
                    debug!(
                        %ts,
                        %action,
                        price = close,
                        pnl_percent = settlement.pnl_percent,
                        balance = account.balance(),
                        "position closed"
                    );
                }
            }
        }

        let unrealized_pnl_percent = match (&position, series.last()) {
            (Some(open), Some(last)) => Some(open.gross_pnl(last.bar.close) * 100.0),
            _ => None,
        };

        info!(
            bars = series.len(),
            events = ledger.len(),
            trades = ledger.closed_trades(),
            final_balance = account.balance(),
            pnl_sum = ledger.pnl_sum(),
            open = position.is_some(),
            "backtest finished"
        );

        BacktestOutcome {
            ledger,
            final_balance: account.balance(),
            open_position: position,
            unrealized_pnl_percent,
            bars_processed: series.len(),
        }
    }
}

/// Replay `bars` against `signals` and return the event ledger.
pub fn run(
    bars: &[Bar],
    signals: &[Signal],
    tp: f64,
    sl: f64,
    initial_balance: f64,
    fee_rate: f64,
) -> Result<Ledger> {
    let backtester = Backtester::new(BacktestConfig {
        tp,
        sl,
        initial_balance,
        fee_rate,
    })?;
    Ok(backtester.run(bars, signals).ledger)
}
