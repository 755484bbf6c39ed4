use chrono::{DateTime, Utc};
use serde::Serialize;

use common::{LedgerAction, LedgerEntry};

/// Append-only sequence of ledger rows.
///
/// `pnl_sum` is the running sum of `pnl_percent`; rows are never edited once
/// recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row, deriving its `pnl_sum` from the previous row.
    pub fn record(
        &mut self,
        timestamp: DateTime<Utc>,
        action: LedgerAction,
        (buy_price, sell_price): (f64, f64),
        quantity: f64,
        pnl_percent: f64,
        balance: f64,
    ) -> &LedgerEntry {
        let pnl_sum = self.pnl_sum() + pnl_percent;
        self.entries.push(LedgerEntry {
            timestamp,
            action,
            buy_price,
            sell_price,
            quantity,
            pnl_percent,
            pnl_sum,
            balance,
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Cumulative PnL in percentage points after the last row.
    pub fn pnl_sum(&self) -> f64 {
        self.entries.last().map(|e| e.pnl_sum).unwrap_or(0.0)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of closed trades (exit rows).
    pub fn closed_trades(&self) -> usize {
        self.entries.iter().filter(|e| e.action.is_exit()).count()
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Ledger {
    type Item = &'a LedgerEntry;
    type IntoIter = std::slice::Iter<'a, LedgerEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnl_sum_accumulates_row_by_row() {
        let mut ledger = Ledger::new();
        let t = Utc::now();
        ledger.record(t, LedgerAction::Buy, (100.0, 0.0), 1.0, -0.06, 999.4);
        ledger.record(t, LedgerAction::Tp, (100.0, 106.0), 1.0, 5.94, 1058.7);
        let last = ledger.record(t, LedgerAction::Sell, (0.0, 106.0), 1.0, -0.06, 1058.0);

        assert!((last.pnl_sum - 5.82).abs() < 1e-9);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.closed_trades(), 1);
    }

    #[test]
    fn empty_ledger_has_zero_sum() {
        let ledger = Ledger::new();
        assert!(ledger.is_empty());
        assert_eq!(ledger.pnl_sum(), 0.0);
        assert!(ledger.last().is_none());
    }
}
