use std::str::FromStr;

use crate::{Error, Result, TradingMode};

/// Which Bybit deployment the live client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeEnv {
    Mainnet,
    Testnet,
    Demo,
}

impl FromStr for ExchangeEnv {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(ExchangeEnv::Mainnet),
            "testnet" => Ok(ExchangeEnv::Testnet),
            "demo" => Ok(ExchangeEnv::Demo),
            other => Err(Error::Config(format!(
                "BYBIT_ENV must be 'mainnet', 'testnet' or 'demo', got: '{other}'"
            ))),
        }
    }
}

/// Process-level configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (required in live mode only)
    pub bybit_api_key: Option<String>,
    pub bybit_secret: Option<String>,
    pub bybit_env: ExchangeEnv,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    pub paper_balance: f64,

    // Persistence
    pub database_url: Option<String>,
    pub ledger_path: String,

    // Strategy config file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first
    /// if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trading_mode = match lookup("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
                )))
            }
        };

        let bybit_api_key = lookup("BYBIT_API_KEY").filter(|v| !v.is_empty());
        let bybit_secret = lookup("BYBIT_SECRET").filter(|v| !v.is_empty());
        if trading_mode == TradingMode::Live && (bybit_api_key.is_none() || bybit_secret.is_none())
        {
            return Err(Error::Config(
                "BYBIT_API_KEY and BYBIT_SECRET are required when TRADING_MODE=live".into(),
            ));
        }

        let bybit_env = match lookup("BYBIT_ENV") {
            Some(v) => v.parse()?,
            None => ExchangeEnv::Demo,
        };

        Ok(Config {
            bybit_api_key,
            bybit_secret,
            bybit_env,
            trading_mode,
            paper_slippage_bps: parse_or(&lookup, "PAPER_SLIPPAGE_BPS", 0.0)?,
            paper_balance: parse_or(&lookup, "PAPER_BALANCE", 50_000.0)?,
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            ledger_path: lookup("LEDGER_PATH")
                .unwrap_or_else(|| "data/trade_ledger.csv".to_string()),
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategy.toml".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}
