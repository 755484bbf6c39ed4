use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Round a price or volume to the 3 decimal places used at ingestion.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One OHLCV record. `timestamp` is the open time of the interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Copy of this bar with every price and the volume rounded to 3 dp.
    pub fn rounded(self) -> Self {
        Self {
            open: round3(self.open),
            high: round3(self.high),
            low: round3(self.low),
            close: round3(self.close),
            volume: round3(self.volume),
            ..self
        }
    }
}

/// Directional intent carried by a signal: +1 long, -1 short, 0 none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SignalValue {
    Long,
    Short,
    #[default]
    Flat,
}

impl SignalValue {
    /// The position side this signal asks for, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            SignalValue::Long => Some(Side::Long),
            SignalValue::Short => Some(Side::Short),
            SignalValue::Flat => None,
        }
    }

    pub fn is_actionable(self) -> bool {
        self != SignalValue::Flat
    }
}

impl TryFrom<i64> for SignalValue {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SignalValue::Long),
            -1 => Ok(SignalValue::Short),
            0 => Ok(SignalValue::Flat),
            other => Err(Error::Config(format!(
                "signal value must be -1, 0 or 1, got {other}"
            ))),
        }
    }
}

impl From<SignalValue> for i64 {
    fn from(value: SignalValue) -> Self {
        match value {
            SignalValue::Long => 1,
            SignalValue::Short => -1,
            SignalValue::Flat => 0,
        }
    }
}

/// A directional trading intent at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub value: SignalValue,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, value: SignalValue) -> Self {
        Self { timestamp, value }
    }
}

/// Side of an order as the exchange sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Order side that opens a position on this side.
    pub fn entry_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position on this side.
    pub fn exit_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Take-profit and stop-loss prices for an entry at `entry_price`.
    /// `tp` and `sl` are fractions (0.05 = 5%).
    pub fn thresholds(self, entry_price: f64, tp: f64, sl: f64) -> (f64, f64) {
        match self {
            Side::Long => (entry_price * (1.0 + tp), entry_price * (1.0 - sl)),
            Side::Short => (entry_price * (1.0 - tp), entry_price * (1.0 + sl)),
        }
    }

    /// Directional PnL of a move from `entry` to `exit`, as a fraction.
    pub fn gross_pnl(self, entry: f64, exit: f64) -> f64 {
        match self {
            Side::Long => (exit - entry) / entry,
            Side::Short => (entry - exit) / entry,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

impl From<OrderSide> for Side {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }
}

/// The single open position tracked by a simulation or monitor run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Quantity in base-asset units.
    pub size: f64,
    pub tp_price: f64,
    pub sl_price: f64,
}

impl Position {
    pub fn open(
        side: Side,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        size: f64,
        tp: f64,
        sl: f64,
    ) -> Self {
        let (tp_price, sl_price) = side.thresholds(entry_price, tp, sl);
        Self {
            side,
            entry_price,
            entry_time,
            size,
            tp_price,
            sl_price,
        }
    }

    pub fn gross_pnl(&self, exit_price: f64) -> f64 {
        self.side.gross_pnl(self.entry_price, exit_price)
    }

    /// True once `price` is at or beyond the stop-loss level.
    pub fn stop_loss_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price <= self.sl_price,
            Side::Short => price >= self.sl_price,
        }
    }

    /// True once `price` is at or beyond the take-profit level.
    pub fn take_profit_hit(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price >= self.tp_price,
            Side::Short => price <= self.tp_price,
        }
    }

    /// Ledger `(buy_price, sell_price)` for a close at `exit_price`.
    pub fn exit_prices(&self, exit_price: f64) -> (f64, f64) {
        match self.side {
            Side::Long => (self.entry_price, exit_price),
            Side::Short => (exit_price, self.entry_price),
        }
    }

    /// Ledger `(buy_price, sell_price)` for the entry row.
    pub fn entry_prices(&self) -> (f64, f64) {
        match self.side {
            Side::Long => (self.entry_price, 0.0),
            Side::Short => (0.0, self.entry_price),
        }
    }
}

/// Base-asset quantity for a USDT notional at `price`, rounded to the
/// exchange step of 0.001 and never below that minimum.
pub fn quantity_for_notional(notional_usdt: f64, price: f64) -> f64 {
    const MIN_QTY: f64 = 0.001;
    if price <= 0.0 {
        return MIN_QTY;
    }
    round3(notional_usdt / price).max(MIN_QTY)
}

/// A position as reported by the exchange's account endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
}

/// A market order with optional exchange-enforced TP/SL levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    /// Reference price the order was sized against.
    pub price: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            take_profit: None,
            stop_loss: None,
        }
    }

    pub fn with_brackets(mut self, take_profit: f64, stop_loss: f64) -> Self {
        self.take_profit = Some(take_profit);
        self.stop_loss = Some(stop_loss);
        self
    }
}

/// Confirmation of an accepted order returned by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub fill_price: f64,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}

/// What caused a reduce-only order on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseTrigger {
    TakeProfit,
    StopLoss,
    /// Placed by hand or by an explicit close call.
    Manual,
}

/// One row of the exchange's order history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub avg_price: Option<f64>,
    pub reduce_only: bool,
    pub filled: bool,
    pub trigger: CloseTrigger,
    pub updated_at: DateTime<Utc>,
}

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum LedgerAction {
    Buy,
    Sell,
    Tp,
    Sl,
    DirectionChange,
    ManualClose,
    AutoClose,
}

impl LedgerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerAction::Buy => "buy",
            LedgerAction::Sell => "sell",
            LedgerAction::Tp => "tp",
            LedgerAction::Sl => "sl",
            LedgerAction::DirectionChange => "direction_change",
            LedgerAction::ManualClose => "manual_close",
            LedgerAction::AutoClose => "auto_close",
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(self, LedgerAction::Buy | LedgerAction::Sell)
    }

    pub fn is_exit(self) -> bool {
        !self.is_entry()
    }

    pub fn entry_for(side: Side) -> Self {
        match side {
            Side::Long => LedgerAction::Buy,
            Side::Short => LedgerAction::Sell,
        }
    }
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LedgerAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(LedgerAction::Buy),
            "sell" => Ok(LedgerAction::Sell),
            "tp" => Ok(LedgerAction::Tp),
            "sl" => Ok(LedgerAction::Sl),
            "direction_change" => Ok(LedgerAction::DirectionChange),
            "manual_close" => Ok(LedgerAction::ManualClose),
            "auto_close" => Ok(LedgerAction::AutoClose),
            other => Err(Error::Other(format!("unknown ledger action '{other}'"))),
        }
    }
}

/// One entry or exit event. `pnl_percent` and `pnl_sum` are in percentage
/// points; `pnl_sum` is the running total including this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LedgerAction,
    pub buy_price: f64,
    pub sell_price: f64,
    pub quantity: f64,
    pub pnl_percent: f64,
    pub pnl_sum: f64,
    pub balance: f64,
}

/// Whether the monitor is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_thresholds_bracket_entry() {
        let (tp, sl) = Side::Long.thresholds(100.0, 0.05, 0.03);
        assert!((tp - 105.0).abs() < 1e-9);
        assert!((sl - 97.0).abs() < 1e-9);
    }

    #[test]
    fn short_thresholds_are_mirrored() {
        let (tp, sl) = Side::Short.thresholds(100.0, 0.05, 0.03);
        assert!((tp - 95.0).abs() < 1e-9);
        assert!((sl - 103.0).abs() < 1e-9);
    }

    #[test]
    fn short_position_profits_when_price_falls() {
        let pos = Position::open(Side::Short, 200.0, Utc::now(), 1.0, 0.05, 0.03);
        assert!((pos.gross_pnl(190.0) - 0.05).abs() < 1e-12);
        assert!(pos.take_profit_hit(190.0));
        assert!(!pos.stop_loss_hit(190.0));
        assert_eq!(pos.exit_prices(190.0), (190.0, 200.0));
    }

    #[test]
    fn signal_value_rejects_out_of_range() {
        assert_eq!(SignalValue::try_from(1).unwrap(), SignalValue::Long);
        assert_eq!(SignalValue::try_from(-1).unwrap(), SignalValue::Short);
        assert!(SignalValue::try_from(2).is_err());
    }

    #[test]
    fn signal_value_serializes_as_integer() {
        let json = serde_json::to_string(&SignalValue::Short).unwrap();
        assert_eq!(json, "-1");
        let back: SignalValue = serde_json::from_str("1").unwrap();
        assert_eq!(back, SignalValue::Long);
    }

    #[test]
    fn quantity_respects_minimum_and_step() {
        assert_eq!(quantity_for_notional(1000.0, 50_000.0), 0.02);
        assert_eq!(quantity_for_notional(1.0, 50_000.0), 0.001);
    }

    #[test]
    fn ledger_action_round_trips_through_str() {
        for action in [
            LedgerAction::Buy,
            LedgerAction::DirectionChange,
            LedgerAction::ManualClose,
        ] {
            assert_eq!(action.as_str().parse::<LedgerAction>().unwrap(), action);
        }
    }
}
