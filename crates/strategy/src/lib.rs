//! Indicator-driven signal generation.
//!
//! Each configured indicator votes +1/-1/0 per bar; the per-bar signal is the
//! most common vote, or 0 when the two most common votes tie.

pub mod config;
pub mod indicators;
pub mod registry;

pub use config::{IndicatorConfig, StrategyFileConfig};
pub use registry::{IndicatorKind, ParamSpec};

use tracing::{debug, info};

use common::{Bar, Error, Result, Signal, SignalValue};

/// Turns a bar series into a signal series using the configured indicators.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    name: String,
    indicators: Vec<IndicatorConfig>,
}

impl SignalGenerator {
    pub fn from_config(cfg: &StrategyFileConfig) -> Result<Self> {
        cfg.validate()?;
        for indicator in &cfg.indicators {
            info!(strategy = %cfg.name, indicator = %indicator.label(), "Registered indicator");
        }
        Ok(Self {
            name: cfg.name.clone(),
            indicators: cfg.indicators.clone(),
        })
    }

    pub fn new(name: impl Into<String>, indicators: Vec<IndicatorConfig>) -> Result<Self> {
        let name = name.into();
        if indicators.is_empty() {
            return Err(Error::Config(format!("strategy '{name}' enables no indicators")));
        }
        indicators.iter().try_for_each(IndicatorConfig::validate)?;
        Ok(Self { name, indicators })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indicators(&self) -> &[IndicatorConfig] {
        &self.indicators
    }

    /// One signal per bar once every indicator has warmed up.
    pub fn generate(&self, bars: &[Bar]) -> Vec<Signal> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let columns: Vec<Vec<Option<SignalValue>>> =
            self.indicators.iter().map(|i| i.votes(&closes)).collect();

        let mut signals = Vec::with_capacity(bars.len());
        let mut ballot = Vec::with_capacity(columns.len());
        for (i, bar) in bars.iter().enumerate() {
            ballot.clear();
            for column in &columns {
                match column[i] {
                    Some(v) => ballot.push(v),
                    None => break,
                }
            }
            if ballot.len() < columns.len() {
                continue;
            }
            signals.push(Signal::new(bar.timestamp, vote(&ballot)));
        }

        debug!(
            strategy = %self.name,
            bars = bars.len(),
            signals = signals.len(),
            "Generated signals"
        );
        signals
    }
}

/// Most common value among `votes`; a tie for first place, or no votes, is Flat.
pub fn vote(votes: &[SignalValue]) -> SignalValue {
    let mut counts = [
        (SignalValue::Long, 0usize),
        (SignalValue::Short, 0),
        (SignalValue::Flat, 0),
    ];
    for v in votes {
        if let Some(slot) = counts.iter_mut().find(|(value, _)| value == v) {
            slot.1 += 1;
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    if counts[0].1 == 0 || counts[0].1 == counts[1].1 {
        SignalValue::Flat
    } else {
        counts[0].0
    }
}
