use async_trait::async_trait;

use crate::{LedgerEntry, Result};

/// Durable destination for ledger rows.
///
/// The live monitor calls `append` once per event, at the moment the row is
/// computed, so a crash never loses a completed trade.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<()>;
}
