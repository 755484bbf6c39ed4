use serde::Serialize;

/// Account state threaded through a backtest or monitor run.
///
/// Fees are a fraction of the current balance, not of the position notional,
/// so they compound with the account.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Account {
    balance: f64,
    initial_balance: f64,
    fee_rate: f64,
}

/// Result of closing a position against the account.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSettlement {
    /// Directional move as a fraction, before fees.
    pub gross_pnl: f64,
    /// Fee deducted after the move was applied.
    pub fee: f64,
    /// Net PnL in percentage points: `(gross - fee_rate) * 100`.
    pub pnl_percent: f64,
}

impl Account {
    pub fn new(initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            balance: initial_balance,
            initial_balance,
            fee_rate,
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    /// Nothing left to trade with.
    pub fn is_depleted(&self) -> bool {
        self.balance <= 0.0
    }

    /// Deduct the entry fee and return the amount charged.
    pub fn charge_entry(&mut self) -> f64 {
        let fee = self.fee_rate * self.balance;
        self.balance -= fee;
        fee
    }

    /// Entry fee expressed in percentage points, as the live ledger records it.
    pub fn entry_pnl_percent(&self) -> f64 {
        -self.fee_rate * 100.0
    }

    /// Apply a directional move to the balance, then deduct the exit fee on
    /// the post-move balance. A loss of 100% or more leaves the balance at
    /// zero.
    pub fn settle_exit(&mut self, gross_pnl: f64) -> ExitSettlement {
        self.balance = (self.balance * (1.0 + gross_pnl)).max(0.0);
        let fee = self.fee_rate * self.balance;
        self.balance -= fee;
        ExitSettlement {
            gross_pnl,
            fee,
            pnl_percent: (gross_pnl - self.fee_rate) * 100.0,
        }
    }
}
