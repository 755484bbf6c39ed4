pub mod config;
pub mod error;
pub mod exchange;
pub mod interval;
pub mod sink;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeClient;
pub use interval::Interval;
pub use sink::LedgerSink;
pub use types::*;
