/// Exponential moving average with smoothing `2 / (window + 1)`, seeded with
/// the simple average of the first `window` closes.
pub fn ema(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() < window {
        return out;
    }
    let k = 2.0 / (window as f64 + 1.0);
    let mut value = closes[..window].iter().sum::<f64>() / window as f64;
    out[window - 1] = Some(value);
    for i in window..closes.len() {
        value = closes[i] * k + value * (1.0 - k);
        out[i] = Some(value);
    }
    out
}

/// `ema` over a series that itself has a warm-up prefix of `None`s.
pub(crate) fn ema_of(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let first = series.iter().position(Option::is_some).unwrap_or(series.len());
    let defined: Vec<f64> = series[first..].iter().flatten().copied().collect();
    let mut out = vec![None; first];
    out.extend(ema(&defined, window));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_with_sma_then_smooths() {
        let out = ema(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(4.0));
        // k = 0.5
        assert_eq!(out[3], Some(6.0));
    }

    #[test]
    fn constant_series_stays_constant() {
        let out = ema(&[5.0; 10], 4);
        assert!(out[3..].iter().all(|v| *v == Some(5.0)));
    }

    #[test]
    fn ema_of_skips_prefix() {
        let series = vec![None, None, Some(1.0), Some(1.0), Some(4.0)];
        let out = ema_of(&series, 2);
        assert_eq!(out.len(), 5);
        assert_eq!(out[2], None);
        assert_eq!(out[3], Some(1.0));
    }
}
