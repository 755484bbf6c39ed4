use common::{Error, Result, SignalValue};

use crate::config::{BollingerParams, IndicatorConfig, MacdParams, MaParams, RsiParams};
use crate::indicators::{bollinger, ema, macd, rsi, sma, wma};

/// Every indicator the registry can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Wma,
    Rsi,
    Macd,
    Bollinger,
}

/// Declared range and default of one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

const fn spec(name: &'static str, default: f64, min: f64, max: f64) -> ParamSpec {
    ParamSpec {
        name,
        default,
        min,
        max,
    }
}

const MA_SCHEMA: &[ParamSpec] = &[spec("window", 20.0, 5.0, 50.0)];
const RSI_SCHEMA: &[ParamSpec] = &[
    spec("window", 14.0, 5.0, 30.0),
    spec("overbought", 70.0, 50.0, 100.0),
    spec("oversold", 30.0, 0.0, 50.0),
];
const MACD_SCHEMA: &[ParamSpec] = &[
    spec("fast", 12.0, 2.0, 50.0),
    spec("slow", 26.0, 5.0, 100.0),
    spec("signal", 9.0, 2.0, 50.0),
];
const BOLLINGER_SCHEMA: &[ParamSpec] = &[
    spec("window", 20.0, 5.0, 50.0),
    spec("num_std", 2.0, 0.5, 4.0),
];

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        IndicatorKind::Sma,
        IndicatorKind::Ema,
        IndicatorKind::Wma,
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::Bollinger,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Wma => "wma",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Bollinger => "bollinger",
        }
    }

    pub fn param_schema(self) -> &'static [ParamSpec] {
        match self {
            IndicatorKind::Sma | IndicatorKind::Ema | IndicatorKind::Wma => MA_SCHEMA,
            IndicatorKind::Rsi => RSI_SCHEMA,
            IndicatorKind::Macd => MACD_SCHEMA,
            IndicatorKind::Bollinger => BOLLINGER_SCHEMA,
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl IndicatorConfig {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            IndicatorConfig::Sma(_) => IndicatorKind::Sma,
            IndicatorConfig::Ema(_) => IndicatorKind::Ema,
            IndicatorConfig::Wma(_) => IndicatorKind::Wma,
            IndicatorConfig::Rsi(_) => IndicatorKind::Rsi,
            IndicatorConfig::Macd(_) => IndicatorKind::Macd,
            IndicatorConfig::Bollinger(_) => IndicatorKind::Bollinger,
        }
    }

    /// Parameter values in the order of `kind().param_schema()`.
    pub fn param_values(&self) -> Vec<f64> {
        match *self {
            IndicatorConfig::Sma(MaParams { window })
            | IndicatorConfig::Ema(MaParams { window })
            | IndicatorConfig::Wma(MaParams { window }) => vec![window as f64],
            IndicatorConfig::Rsi(RsiParams {
                window,
                overbought,
                oversold,
            }) => vec![window as f64, overbought, oversold],
            IndicatorConfig::Macd(MacdParams { fast, slow, signal }) => {
                vec![fast as f64, slow as f64, signal as f64]
            }
            IndicatorConfig::Bollinger(BollingerParams { window, num_std }) => {
                vec![window as f64, num_std]
            }
        }
    }

    /// Short label such as `sma_20` or `macd_12_26_9`.
    pub fn label(&self) -> String {
        let values: Vec<String> = self.param_values().iter().map(|v| v.to_string()).collect();
        format!("{}_{}", self.kind(), values.join("_"))
    }

    /// Check every parameter against its declared range.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        for (spec, value) in kind.param_schema().iter().zip(self.param_values()) {
            if !(spec.min..=spec.max).contains(&value) {
                return Err(Error::Config(format!(
                    "{kind}.{} = {value} is outside [{}, {}]",
                    spec.name, spec.min, spec.max
                )));
            }
        }
        match *self {
            IndicatorConfig::Macd(p) if p.fast >= p.slow => Err(Error::Config(format!(
                "macd fast ({}) must be shorter than slow ({})",
                p.fast, p.slow
            ))),
            IndicatorConfig::Rsi(p) if p.oversold >= p.overbought => Err(Error::Config(format!(
                "rsi oversold ({}) must be below overbought ({})",
                p.oversold, p.overbought
            ))),
            _ => Ok(()),
        }
    }

    /// Per-bar vote of this indicator; `None` while it is warming up.
    pub fn votes(&self, closes: &[f64]) -> Vec<Option<SignalValue>> {
        match *self {
            IndicatorConfig::Sma(p) => trend_votes(closes, &sma(closes, p.window)),
            IndicatorConfig::Ema(p) => trend_votes(closes, &ema(closes, p.window)),
            IndicatorConfig::Wma(p) => trend_votes(closes, &wma(closes, p.window)),
            IndicatorConfig::Rsi(p) => rsi(closes, p.window)
                .into_iter()
                .map(|v| {
                    v.map(|r| {
                        if r > p.overbought {
                            SignalValue::Short
                        } else if r < p.oversold {
                            SignalValue::Long
                        } else {
                            SignalValue::Flat
                        }
                    })
                })
                .collect(),
            IndicatorConfig::Macd(p) => macd(closes, p.fast, p.slow, p.signal)
                .into_iter()
                .map(|point| point.map(|m| compare(m.macd, m.signal)))
                .collect(),
            IndicatorConfig::Bollinger(p) => bollinger(closes, p.window, p.num_std)
                .into_iter()
                .zip(closes)
                .map(|(bands, &close)| {
                    bands.map(|b| {
                        if close > b.upper {
                            SignalValue::Short
                        } else if close < b.lower {
                            SignalValue::Long
                        } else {
                            SignalValue::Flat
                        }
                    })
                })
                .collect(),
        }
    }
}

/// +1 above the reference, -1 below, 0 on it.
fn compare(value: f64, reference: f64) -> SignalValue {
    if value > reference {
        SignalValue::Long
    } else if value < reference {
        SignalValue::Short
    } else {
        SignalValue::Flat
    }
}

fn trend_votes(closes: &[f64], average: &[Option<f64>]) -> Vec<Option<SignalValue>> {
    closes
        .iter()
        .zip(average)
        .map(|(&close, avg)| avg.map(|a| compare(close, a)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_declares_a_schema() {
        for kind in IndicatorKind::ALL {
            assert!(!kind.param_schema().is_empty(), "{kind} has no schema");
        }
    }

    #[test]
    fn defaults_sit_inside_their_ranges() {
        for kind in IndicatorKind::ALL {
            for p in kind.param_schema() {
                assert!((p.min..=p.max).contains(&p.default), "{kind}.{}", p.name);
            }
        }
    }

    #[test]
    fn out_of_range_window_is_rejected() {
        let cfg = IndicatorConfig::Sma(MaParams { window: 200 });
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        assert!(IndicatorConfig::Sma(MaParams::default()).validate().is_ok());
    }

    #[test]
    fn inverted_macd_is_rejected() {
        let cfg = IndicatorConfig::Macd(MacdParams {
            fast: 30,
            slow: 20,
            signal: 9,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn labels_include_parameters() {
        assert_eq!(IndicatorConfig::Macd(MacdParams::default()).label(), "macd_12_26_9");
        assert_eq!(IndicatorConfig::Wma(MaParams { window: 7 }).label(), "wma_7");
    }

    #[test]
    fn moving_average_votes_follow_close() {
        let closes = [10.0, 10.0, 10.0, 10.0, 10.0, 20.0, 1.0];
        let votes = IndicatorConfig::Sma(MaParams { window: 5 }).votes(&closes);
        assert_eq!(votes[3], None);
        assert_eq!(votes[4], Some(SignalValue::Flat));
        assert_eq!(votes[5], Some(SignalValue::Long));
        assert_eq!(votes[6], Some(SignalValue::Short));
    }

    #[test]
    fn rsi_votes_contrarian() {
        let rising: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let votes = IndicatorConfig::Rsi(RsiParams {
            window: 5,
            ..Default::default()
        })
        .votes(&rising);
        assert_eq!(votes[9], Some(SignalValue::Short));
    }

    #[test]
    fn bollinger_breakout_above_upper_is_short() {
        let mut closes = vec![100.0; 5];
        closes.push(130.0);
        let votes = IndicatorConfig::Bollinger(BollingerParams {
            window: 5,
            num_std: 1.0,
        })
        .votes(&closes);
        assert_eq!(votes[4], Some(SignalValue::Flat));
        assert_eq!(votes[5], Some(SignalValue::Short));
    }
}
