//! Persistence: CSV files for bars, signals and ledgers, and a SQLite
//! ledger table.

pub mod files;
pub mod sqlite;

pub use files::{
    read_bars, read_ledger, read_signals, write_bars, write_ledger, write_signals,
    CsvLedgerSink, LEDGER_HEADER,
};
pub use sqlite::{connect, load_ledger, save_ledger, SqliteLedgerSink};
