use super::sma::sma;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA(`window`) ± `num_std` population standard deviations.
pub fn bollinger(closes: &[f64], window: usize, num_std: f64) -> Vec<Option<Bands>> {
    sma(closes, window)
        .into_iter()
        .enumerate()
        .map(|(i, mid)| {
            let middle = mid?;
            let slice = &closes[i + 1 - window..=i];
            let var = slice.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / window as f64;
            let width = num_std * var.sqrt();
            Some(Bands {
                upper: middle + width,
                middle,
                lower: middle - width,
            })
        })
        .collect()
}
