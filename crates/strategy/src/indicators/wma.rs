/// Linearly weighted moving average; the newest close has weight `window`.
pub fn wma(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if window == 0 || closes.len() < window {
        return out;
    }
    let denom = (window * (window + 1) / 2) as f64;
    for i in window - 1..closes.len() {
        let slice = &closes[i + 1 - window..=i];
        let weighted: f64 = slice
            .iter()
            .enumerate()
            .map(|(j, c)| c * (j + 1) as f64)
            .sum();
        out[i] = Some(weighted / denom);
    }
    out
}
