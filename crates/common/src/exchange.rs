use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Bar, ExchangePosition, Fill, Interval, OrderRecord, OrderRequest, OrderSide, Result};

/// Abstraction over the exchange connection.
///
/// `BybitClient` implements this for live trading.
/// `PaperClient` implements this for simulation.
///
/// The live monitor receives one of these at construction time and never
/// reaches for a global client.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Historical bars in `[start, end)`, oldest first. May be shorter than
    /// requested or empty.
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;

    /// Get the latest traded price for a symbol.
    async fn current_price(&self, symbol: &str) -> Result<f64>;

    /// The open position on `symbol`, if the account holds one.
    async fn open_position(&self, symbol: &str) -> Result<Option<ExchangePosition>>;

    /// Submit a market order, with TP/SL attached when the request carries them.
    async fn place_order(&self, order: &OrderRequest) -> Result<Fill>;

    /// Close `quantity` of the open position with a reduce-only market order.
    /// `side` is the closing order's side. `reference_price` is reported as
    /// the fill price when the venue cannot say what the order filled at.
    async fn close_position(
        &self,
        symbol: &str,
        quantity: f64,
        side: OrderSide,
        reference_price: f64,
    ) -> Result<Fill>;

    /// Most recent orders on `symbol`, newest first.
    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<OrderRecord>>;

    /// Available account balance in the quote currency.
    async fn wallet_balance(&self) -> Result<f64>;

    /// Taker fee rate for `symbol` as a fraction (0.0006 = 0.06%).
    async fn fee_rate(&self, symbol: &str) -> Result<f64>;
}
