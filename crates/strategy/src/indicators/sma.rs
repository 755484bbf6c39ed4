/// Simple moving average over a trailing `window`.
///
/// Entry `i` covers `closes[i + 1 - window..=i]`; the first `window - 1`
/// entries are `None`.
pub fn sma(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() < window {
        return out;
    }
    let mut sum: f64 = closes[..window].iter().sum();
    out[window - 1] = Some(sum / window as f64);
    for i in window..closes.len() {
        sum += closes[i] - closes[i - window];
        out[i] = Some(sum / window as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_then_averages() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(out[..2], [None, None]);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[4], Some(4.0));
    }

    #[test]
    fn short_series_is_all_none() {
        assert!(sma(&[1.0, 2.0], 5).iter().all(Option::is_none));
    }
}
