pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod wma;

pub use bollinger::{bollinger, Bands};
pub use ema::ema;
pub use macd::{macd, MacdPoint};
pub use rsi::rsi;
pub use sma::sma;
pub use wma::wma;
