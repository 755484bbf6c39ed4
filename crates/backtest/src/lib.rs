//! Offline backtesting: merge a signal series onto a bar grid, walk it bar by
//! bar with a single-position state machine, and produce a trade ledger.

pub mod accounting;
pub mod clean;
pub mod ledger;
pub mod merge;
pub mod simulator;
pub mod stats;

pub use accounting::{Account, ExitSettlement};
pub use clean::{clean_bars, resample};
pub use ledger::Ledger;
pub use merge::{merge, MergedBar};
pub use simulator::{run, BacktestConfig, BacktestOutcome, Backtester, PositionState};
pub use stats::PerformanceStats;
