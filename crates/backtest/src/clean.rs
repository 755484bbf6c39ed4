use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use common::{Bar, Interval};

/// Normalise a raw bar series onto a gap-free grid.
///
/// Timestamps are floored to `interval` and duplicates dropped (first
/// occurrence wins). The output covers every slot from the first to the last
/// bar; missing slots are filled by linear interpolation of each OHLCV column
/// between the surrounding known bars. All values are rounded to 3 dp.
pub fn clean_bars(bars: &[Bar], interval: Interval) -> Vec<Bar> {
    let mut known: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
    for bar in bars {
        let ts = interval.floor(bar.timestamp);
        known.entry(ts).or_insert(Bar {
            timestamp: ts,
            ..*bar
        });
    }

    let dropped = bars.len() - known.len();
    let slots: Vec<&Bar> = known.values().collect();
    let step = interval.duration();
    let mut out = Vec::with_capacity(slots.len());
    let mut filled = 0usize;

    for pair in slots.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        out.push(left.rounded());

        let gap = (right.timestamp - left.timestamp).num_minutes() / interval.minutes();
        for k in 1..gap {
            let weight = k as f64 / gap as f64;
            out.push(
                Bar {
                    timestamp: left.timestamp + step * k as i32,
                    open: lerp(left.open, right.open, weight),
                    high: lerp(left.high, right.high, weight),
                    low: lerp(left.low, right.low, weight),
                    close: lerp(left.close, right.close, weight),
                    volume: lerp(left.volume, right.volume, weight),
                }
                .rounded(),
            );
            filled += 1;
        }
    }
    if let Some(last) = slots.last() {
        out.push(last.rounded());
    }

    debug!(
        input = bars.len(),
        output = out.len(),
        dropped,
        filled,
        interval = %interval,
        "bars cleaned"
    );
    out
}

fn lerp(a: f64, b: f64, weight: f64) -> f64 {
    a + (b - a) * weight
}

/// Aggregate bars into a coarser `target` interval.
///
/// Each bucket takes the first open, the highest high, the lowest low, the
/// last close and the summed volume. Input must be in timestamp order.
pub fn resample(bars: &[Bar], target: Interval) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();
    for bar in bars {
        let bucket = target.floor(bar.timestamp);
        match out.last_mut() {
            Some(agg) if agg.timestamp == bucket => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => out.push(Bar {
                timestamp: bucket,
                ..*bar
            }),
        }
    }
    out.into_iter().map(Bar::rounded).collect()
}
