use serde::Serialize;

use common::{LedgerAction, LedgerEntry, Side};

/// Summary metrics derived from a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub loss_rate: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Sum of winning pnl over the absolute sum of losing pnl. `None` when
    /// there are no losing trades.
    pub profit_factor: Option<f64>,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub initial_balance: f64,
    pub final_balance: f64,
    pub net_profit: f64,
    pub total_return_percent: f64,
    pub pnl_sum: f64,
    /// Largest peak-to-trough fall of the balance, in percent of the peak.
    pub max_drawdown_percent: f64,
    pub long_trades: usize,
    pub short_trades: usize,
    pub long_pnl_percent: f64,
    pub short_pnl_percent: f64,
    pub average_duration_minutes: f64,
}

struct Trade {
    side: Option<Side>,
    pnl_percent: f64,
    duration_minutes: Option<f64>,
}

/// Pair each exit row with the entry row that preceded it.
fn trades(entries: &[LedgerEntry]) -> Vec<Trade> {
    let mut open: Option<&LedgerEntry> = None;
    let mut out = Vec::new();
    for entry in entries {
        if entry.action.is_entry() {
            open = Some(entry);
            continue;
        }
        let opened = open.take();
        out.push(Trade {
            side: opened.map(|o| match o.action {
                LedgerAction::Sell => Side::Short,
                _ => Side::Long,
            }),
            pnl_percent: entry.pnl_percent,
            duration_minutes: opened
                .map(|o| (entry.timestamp - o.timestamp).num_seconds() as f64 / 60.0),
        });
    }
    out
}

impl PerformanceStats {
    pub fn compute(entries: &[LedgerEntry], initial_balance: f64) -> Self {
        let trades = trades(entries);
        let final_balance = entries.last().map(|e| e.balance).unwrap_or(initial_balance);

        let wins: Vec<f64> = trades.iter().map(|t| t.pnl_percent).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.pnl_percent).filter(|p| *p <= 0.0).collect();

        let (mut streak_w, mut streak_l, mut max_w, mut max_l) = (0, 0, 0, 0);
        for t in &trades {
            if t.pnl_percent > 0.0 {
                streak_w += 1;
                streak_l = 0;
            } else {
                streak_l += 1;
                streak_w = 0;
            }
            max_w = max_w.max(streak_w);
            max_l = max_l.max(streak_l);
        }

        let mut peak = initial_balance;
        let mut max_drawdown = 0.0_f64;
        for e in entries {
            peak = peak.max(e.balance);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - e.balance) / peak * 100.0);
            }
        }

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();
        let durations: Vec<f64> = trades.iter().filter_map(|t| t.duration_minutes).collect();
        let side_sum = |side: Side| -> (usize, f64) {
            trades
                .iter()
                .filter(|t| t.side == Some(side))
                .fold((0, 0.0), |(n, s), t| (n + 1, s + t.pnl_percent))
        };
        let (long_trades, long_pnl_percent) = side_sum(Side::Long);
        let (short_trades, short_pnl_percent) = side_sum(Side::Short);
        let total = trades.len();

        Self {
            total_trades: total,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: ratio(wins.len(), total),
            loss_rate: ratio(losses.len(), total),
            average_win: mean(&wins),
            average_loss: mean(&losses),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor: (gross_loss > 0.0).then(|| gross_win / gross_loss),
            max_consecutive_wins: max_w,
            max_consecutive_losses: max_l,
            initial_balance,
            final_balance,
            net_profit: final_balance - initial_balance,
            total_return_percent: if initial_balance > 0.0 {
                (final_balance - initial_balance) / initial_balance * 100.0
            } else {
                0.0
            },
            pnl_sum: entries.last().map(|e| e.pnl_sum).unwrap_or(0.0),
            max_drawdown_percent: max_drawdown,
            long_trades,
            short_trades,
            long_pnl_percent,
            short_pnl_percent,
            average_duration_minutes: mean(&durations),
        }
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
