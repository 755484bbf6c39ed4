//! Live execution: the Bybit V5 REST client and the position monitor that
//! replays the backtest state machine against a polled exchange.

pub mod bybit;
pub mod monitor;

pub use bybit::BybitClient;
pub use monitor::{monitor, ExitReason, Monitor, MonitorConfig, MonitorReport};
