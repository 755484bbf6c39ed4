use serde::{Deserialize, Serialize};

use common::{Error, Interval, Result};

/// Strategy definition file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// name = "btc_trend_1"
/// symbol = "BTCUSDT"
/// interval = "1h"
///
/// [[indicator]]
/// kind = "sma"
/// window = 20
///
/// [[indicator]]
/// kind = "rsi"
/// window = 14
/// overbought = 70.0
/// oversold = 30.0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    /// Name used to label signals and persisted ledger rows.
    pub name: String,
    pub symbol: String,
    pub interval: Interval,
    #[serde(rename = "indicator", default)]
    pub indicators: Vec<IndicatorConfig>,
}

/// One enabled indicator and its parameters. Omitted parameters take the
/// registry defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorConfig {
    Sma(MaParams),
    Ema(MaParams),
    Wma(MaParams),
    Rsi(RsiParams),
    Macd(MacdParams),
    Bollinger(BollingerParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaParams {
    pub window: usize,
}

impl Default for MaParams {
    fn default() -> Self {
        Self { window: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RsiParams {
    pub window: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiParams {
    fn default() -> Self {
        Self {
            window: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BollingerParams {
    pub window: usize,
    pub num_std: f64,
}

impl Default for BollingerParams {
    fn default() -> Self {
        Self {
            window: 20,
            num_std: 2.0,
        }
    }
}

impl StrategyFileConfig {
    /// Load and validate a strategy file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("Invalid strategy config at '{path}': {e}")))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.indicators.is_empty() {
            return Err(Error::Config(format!(
                "strategy '{}' enables no indicators",
                self.name
            )));
        }
        self.indicators.iter().try_for_each(IndicatorConfig::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_indicators_with_defaults() {
        let cfg = StrategyFileConfig::from_toml(
            r#"
            name = "btc_trend"
            symbol = "BTCUSDT"
            interval = "15m"

            [[indicator]]
            kind = "ema"
            window = 30

            [[indicator]]
            kind = "macd"

            [[indicator]]
            kind = "bollinger"
            num_std = 2.5
            "#,
        )
        .unwrap();

        assert_eq!(cfg.interval, Interval::M15);
        assert_eq!(cfg.indicators[0], IndicatorConfig::Ema(MaParams { window: 30 }));
        assert_eq!(cfg.indicators[1], IndicatorConfig::Macd(MacdParams::default()));
        assert_eq!(
            cfg.indicators[2],
            IndicatorConfig::Bollinger(BollingerParams {
                window: 20,
                num_std: 2.5
            })
        );
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = StrategyFileConfig::from_toml(
            r#"
            name = "x"
            symbol = "BTCUSDT"
            interval = "1h"
            [[indicator]]
            kind = "ichimoku"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unsupported_interval_is_rejected() {
        let err = StrategyFileConfig::from_toml(
            r#"
            name = "x"
            symbol = "BTCUSDT"
            interval = "7m"
            [[indicator]]
            kind = "sma"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("7m"));
    }

    #[test]
    fn empty_indicator_list_is_rejected() {
        let err = StrategyFileConfig::from_toml(
            "name = \"x\"\nsymbol = \"BTCUSDT\"\ninterval = \"1h\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("no indicators"));
    }
}
