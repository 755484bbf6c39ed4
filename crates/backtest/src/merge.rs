use std::collections::HashMap;

use chrono::{DateTime, Utc};

use common::interval::floor_minute;
use common::{Bar, Signal, SignalValue};

/// A bar joined with the signal observed at its (minute-floored) timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedBar {
    pub bar: Bar,
    pub signal: SignalValue,
}

impl MergedBar {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.bar.timestamp
    }

    /// The signal carried by this row, as a standalone signal record.
    pub fn to_signal(&self) -> Signal {
        Signal::new(self.bar.timestamp, self.signal)
    }
}

/// Left-join `signals` onto the bar grid.
///
/// Both series are floored to the minute. Every bar appears exactly once in
/// the output, in input order; a bar with no matching signal gets
/// `SignalValue::Flat`. Nothing is forward-filled. If several signals floor to
/// the same minute, the last one in input order wins.
pub fn merge(bars: &[Bar], signals: &[Signal]) -> Vec<MergedBar> {
    let by_minute: HashMap<DateTime<Utc>, SignalValue> = signals
        .iter()
        .map(|s| (floor_minute(s.timestamp), s.value))
        .collect();

    bars.iter()
        .map(|bar| {
            let timestamp = floor_minute(bar.timestamp);
            MergedBar {
                bar: Bar { timestamp, ..*bar },
                signal: by_minute.get(&timestamp).copied().unwrap_or_default(),
            }
        })
        .collect()
}
