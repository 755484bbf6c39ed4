use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use common::{
    Bar, CloseTrigger, Error, ExchangeClient, ExchangePosition, Fill, Interval, OrderRecord,
    OrderRequest, OrderSide, Result, Side,
};

/// Default taker fee charged by the simulated venue.
pub const DEFAULT_FEE_RATE: f64 = 0.0006;

/// An open simulated position with its exchange-side brackets.
#[derive(Debug, Clone)]
struct Holding {
    position: ExchangePosition,
    take_profit: Option<f64>,
    stop_loss: Option<f64>,
}

impl Holding {
    fn triggered_by(&self, price: f64) -> Option<CloseTrigger> {
        let (tp_hit, sl_hit) = match self.position.side {
            Side::Long => (
                self.take_profit.is_some_and(|tp| price >= tp),
                self.stop_loss.is_some_and(|sl| price <= sl),
            ),
            Side::Short => (
                self.take_profit.is_some_and(|tp| price <= tp),
                self.stop_loss.is_some_and(|sl| price >= sl),
            ),
        };
        if sl_hit {
            Some(CloseTrigger::StopLoss)
        } else if tp_hit {
            Some(CloseTrigger::TakeProfit)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    prices: HashMap<String, f64>,
    holdings: HashMap<String, Holding>,
    /// Oldest first.
    orders: Vec<OrderRecord>,
    bars: HashMap<String, Vec<Bar>>,
    balance: f64,
}

/// Simulated exchange client for paper trading.
///
/// Fills happen at the latest known price shifted by a fixed basis-point
/// offset. TP/SL levels attached to an entry are enforced whenever
/// `update_price` moves through them, and the resulting close is recorded as a
/// reduce-only order so it can be classified like a real exchange fill.
pub struct PaperClient {
    book: Arc<RwLock<Book>>,
    slippage_bps: f64,
    fee_rate: f64,
}

impl PaperClient {
    pub fn new(initial_balance: f64, slippage_bps: f64) -> Self {
        info!(
            balance = initial_balance,
            slippage_bps = slippage_bps,
            "PaperClient initialized"
        );
        Self {
            book: Arc::new(RwLock::new(Book {
                balance: initial_balance,
                ..Book::default()
            })),
            slippage_bps,
            fee_rate: DEFAULT_FEE_RATE,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Make `bars` available to `fetch_bars` for `symbol`.
    pub async fn load_bars(&self, symbol: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.timestamp);
        self.book.write().await.bars.insert(symbol.to_string(), bars);
    }

    /// Set the latest price for `symbol` and fire any bracket it crosses.
    ///
    /// Returns the trigger that closed the position, if one did.
    pub async fn update_price(&self, symbol: &str, price: f64) -> Option<CloseTrigger> {
        let mut book = self.book.write().await;
        book.prices.insert(symbol.to_string(), price);

        let trigger = book.holdings.get(symbol)?.triggered_by(price)?;
        let holding = book.holdings.remove(symbol)?;
        let exit_side = holding.position.side.exit_order();
        let fill_price = self.apply_slippage(price, exit_side);
        self.settle(&mut book, &holding.position, fill_price, holding.position.size);

        let record = OrderRecord {
            order_id: new_order_id(),
            symbol: symbol.to_string(),
            side: exit_side,
            quantity: holding.position.size,
            avg_price: Some(fill_price),
            reduce_only: true,
            filled: true,
            trigger,
            updated_at: Utc::now(),
        };
        info!(
            symbol,
            trigger = ?trigger,
            price = fill_price,
            entry = holding.position.entry_price,
            "Paper bracket triggered"
        );
        book.orders.push(record);
        Some(trigger)
    }

    /// Copy `symbol`'s price from `source` into this book every `every`.
    ///
    /// The first price is fetched before returning, so the book is never
    /// empty once this succeeds. Later feed failures are logged and retried.
    pub async fn follow_prices(
        self: &Arc<Self>,
        source: Arc<dyn ExchangeClient>,
        symbol: &str,
        every: Duration,
    ) -> Result<JoinHandle<()>> {
        let first = source.current_price(symbol).await?;
        self.update_price(symbol, first).await;
        info!(symbol, price = first, "Paper price feed seeded");

        let paper = Arc::clone(self);
        let symbol = symbol.to_string();
        Ok(tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                match source.current_price(&symbol).await {
                    Ok(price) => {
                        paper.update_price(&symbol, price).await;
                    }
                    Err(e) => warn!(%symbol, error = %e, "Price feed failed"),
                }
            }
        }))
    }

    fn apply_slippage(&self, price: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    /// Realise PnL and the exit fee for closing `quantity` of `position`.
    fn settle(&self, book: &mut Book, position: &ExchangePosition, exit_price: f64, quantity: f64) {
        let pnl = match position.side {
            Side::Long => (exit_price - position.entry_price) * quantity,
            Side::Short => (position.entry_price - exit_price) * quantity,
        };
        book.balance += pnl - exit_price * quantity * self.fee_rate;
    }

    fn price_of(book: &Book, symbol: &str) -> Result<f64> {
        book.prices.get(symbol).copied().ok_or_else(|| {
            Error::Exchange(format!(
                "PaperClient has no price for '{symbol}'. Call update_price first."
            ))
        })
    }
}

fn new_order_id() -> String {
    format!("paper-{}", uuid::Uuid::new_v4())
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        _interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let book = self.book.read().await;
        Ok(book
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp < end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn current_price(&self, symbol: &str) -> Result<f64> {
        Self::price_of(&*self.book.read().await, symbol)
    }

    async fn open_position(&self, symbol: &str) -> Result<Option<ExchangePosition>> {
        Ok(self
            .book
            .read()
            .await
            .holdings
            .get(symbol)
            .map(|h| h.position.clone()))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        let mut book = self.book.write().await;
        let mid = Self::price_of(&book, &order.symbol)?;
        let fill_price = self.apply_slippage(mid, order.side);
        let side = Side::from(order.side);

        let holding = match book.holdings.get(&order.symbol) {
            Some(existing) if existing.position.side != side => {
                return Err(Error::Exchange(format!(
                    "{} already holds a {} position; close it first",
                    order.symbol, existing.position.side
                )));
            }
            Some(existing) => {
                let size = existing.position.size + order.quantity;
                let entry_price = (existing.position.entry_price * existing.position.size
                    + fill_price * order.quantity)
                    / size;
                Holding {
                    position: ExchangePosition {
                        size,
                        entry_price,
                        ..existing.position.clone()
                    },
                    take_profit: order.take_profit.or(existing.take_profit),
                    stop_loss: order.stop_loss.or(existing.stop_loss),
                }
            }
            None => Holding {
                position: ExchangePosition {
                    symbol: order.symbol.clone(),
                    side,
                    size: order.quantity,
                    entry_price: fill_price,
                },
                take_profit: order.take_profit,
                stop_loss: order.stop_loss,
            },
        };

        book.balance -= fill_price * order.quantity * self.fee_rate;
        book.holdings.insert(order.symbol.clone(), holding);

        let order_id = new_order_id();
        let now = Utc::now();
        book.orders.push(OrderRecord {
            order_id: order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            avg_price: Some(fill_price),
            reduce_only: false,
            filled: true,
            trigger: CloseTrigger::Manual,
            updated_at: now,
        });

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            mid,
            fill = fill_price,
            qty = order.quantity,
            tp = ?order.take_profit,
            sl = ?order.stop_loss,
            "Paper fill simulated"
        );

        Ok(Fill {
            order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: now,
        })
    }

    async fn close_position(
        &self,
        symbol: &str,
        quantity: f64,
        side: OrderSide,
        _reference_price: f64,
    ) -> Result<Fill> {
        let mut book = self.book.write().await;
        let mid = Self::price_of(&book, symbol)?;
        let holding = book
            .holdings
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::Exchange(format!("no open position on {symbol}")))?;
        if holding.position.side.exit_order() != side {
            return Err(Error::Exchange(format!(
                "{side} order cannot reduce a {} position",
                holding.position.side
            )));
        }

        let quantity = quantity.min(holding.position.size);
        let fill_price = self.apply_slippage(mid, side);
        self.settle(&mut book, &holding.position, fill_price, quantity);

        let remaining = holding.position.size - quantity;
        if remaining <= f64::EPSILON {
            book.holdings.remove(symbol);
        } else if let Some(h) = book.holdings.get_mut(symbol) {
            h.position.size = remaining;
        }

        let order_id = new_order_id();
        let now = Utc::now();
        book.orders.push(OrderRecord {
            order_id: order_id.clone(),
            symbol: symbol.to_string(),
            side,
            quantity,
            avg_price: Some(fill_price),
            reduce_only: true,
            filled: true,
            trigger: CloseTrigger::Manual,
            updated_at: now,
        });
        debug!(symbol, %side, fill = fill_price, qty = quantity, "Paper close simulated");

        Ok(Fill {
            order_id,
            symbol: symbol.to_string(),
            side,
            fill_price,
            quantity,
            timestamp: now,
        })
    }

    async fn recent_orders(&self, symbol: &str, limit: usize) -> Result<Vec<OrderRecord>> {
        let book = self.book.read().await;
        Ok(book
            .orders
            .iter()
            .rev()
            .filter(|o| o.symbol == symbol)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn wallet_balance(&self) -> Result<f64> {
        Ok(self.book.read().await.balance)
    }

    async fn fee_rate(&self, _symbol: &str) -> Result<f64> {
        Ok(self.fee_rate)
    }
}
