use super::ema::{ema, ema_of};

/// MACD line and its signal line at one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
}

impl MacdPoint {
    pub fn histogram(&self) -> f64 {
        self.macd - self.signal
    }
}

/// MACD (Moving Average Convergence/Divergence) series.
///
/// MACD line = EMA(fast) − EMA(slow); signal = EMA(macd line, `signal`).
/// The first defined entry is at index `slow + signal - 2`.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<Option<MacdPoint>> {
    let fast_line = ema(closes, fast);
    let slow_line = ema(closes, slow);
    let macd_line: Vec<Option<f64>> = fast_line
        .iter()
        .zip(&slow_line)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema_of(&macd_line, signal);

    macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| {
            Some(MacdPoint {
                macd: (*m)?,
                signal: (*s)?,
            })
        })
        .collect()
}
