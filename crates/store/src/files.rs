//! CSV files for bars, signals and ledgers.
//!
//! Timestamps are written as ISO-8601 UTC with microseconds
//! (`2024-01-01T00:00:00.000000Z`). On read, RFC 3339 and the naive
//! `YYYY-MM-DD HH:MM:SS[.f]` form (taken as UTC) are both accepted.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use common::{Bar, Error, LedgerEntry, LedgerSink, Result, Signal, SignalValue};

/// Ledger column order on disk.
pub const LEDGER_HEADER: [&str; 8] = [
    "datetime",
    "action",
    "buy_price",
    "sell_price",
    "quantity",
    "pnl_percent",
    "pnl_sum",
    "balance",
];

const BAR_HEADER: [&str; 6] = ["datetime", "open", "high", "low", "close", "volume"];
const SIGNAL_HEADER: [&str; 2] = ["datetime", "signal"];

fn csv_err(e: ::csv::Error) -> Error {
    Error::Csv(e.to_string())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Csv(format!("bad datetime '{raw}': {e}")))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(fs::create_dir_all(dir)?),
        _ => Ok(()),
    }
}

#[derive(Deserialize)]
struct BarRow {
    datetime: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

#[derive(Deserialize)]
struct SignalRow {
    datetime: String,
    signal: i64,
}

#[derive(Deserialize)]
struct LedgerRow {
    datetime: String,
    action: String,
    buy_price: f64,
    sell_price: f64,
    quantity: f64,
    pnl_percent: f64,
    pnl_sum: f64,
    balance: f64,
}

/// Read an OHLCV file with header `datetime,open,high,low,close,volume`.
/// Prices and volume are rounded to 3 dp. A missing file is `DataUnavailable`.
pub fn read_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::DataUnavailable(format!("no bar file at {}", path.display())));
    }
    let mut reader = ::csv::Reader::from_path(path).map_err(csv_err)?;
    let mut bars = Vec::new();
    for row in reader.deserialize::<BarRow>() {
        let row = row.map_err(csv_err)?;
        bars.push(Bar {
            timestamp: parse_timestamp(&row.datetime)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        }
        .rounded());
    }
    debug!(path = %path.display(), bars = bars.len(), "Read bars");
    Ok(bars)
}

pub fn write_bars(path: impl AsRef<Path>, bars: &[Bar]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = ::csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(BAR_HEADER).map_err(csv_err)?;
    for bar in bars {
        writer
            .write_record([
                format_timestamp(bar.timestamp),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush()?;
    info!(path = %path.display(), bars = bars.len(), "Wrote bars");
    Ok(())
}

/// Read a signal file with header `datetime,signal`; values must be -1, 0 or 1.
pub fn read_signals(path: impl AsRef<Path>) -> Result<Vec<Signal>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::DataUnavailable(format!(
            "no signal file at {}",
            path.display()
        )));
    }
    let mut reader = ::csv::Reader::from_path(path).map_err(csv_err)?;
    let mut signals = Vec::new();
    for row in reader.deserialize::<SignalRow>() {
        let row = row.map_err(csv_err)?;
        let value = SignalValue::try_from(row.signal)?;
        signals.push(Signal::new(parse_timestamp(&row.datetime)?, value));
    }
    debug!(path = %path.display(), signals = signals.len(), "Read signals");
    Ok(signals)
}

pub fn write_signals(path: impl AsRef<Path>, signals: &[Signal]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = ::csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(SIGNAL_HEADER).map_err(csv_err)?;
    for signal in signals {
        writer
            .write_record([
                format_timestamp(signal.timestamp),
                i64::from(signal.value).to_string(),
            ])
            .map_err(csv_err)?;
    }
    writer.flush()?;
    info!(path = %path.display(), signals = signals.len(), "Wrote signals");
    Ok(())
}

fn ledger_record(entry: &LedgerEntry) -> [String; 8] {
    [
        format_timestamp(entry.timestamp),
        entry.action.as_str().to_string(),
        entry.buy_price.to_string(),
        entry.sell_price.to_string(),
        entry.quantity.to_string(),
        entry.pnl_percent.to_string(),
        entry.pnl_sum.to_string(),
        entry.balance.to_string(),
    ]
}

/// Write a complete ledger, replacing any existing file.
pub fn write_ledger(path: impl AsRef<Path>, entries: &[LedgerEntry]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let mut writer = ::csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(LEDGER_HEADER).map_err(csv_err)?;
    for entry in entries {
        writer.write_record(ledger_record(entry)).map_err(csv_err)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = entries.len(), "Wrote ledger");
    Ok(())
}

pub fn read_ledger(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::DataUnavailable(format!("no ledger at {}", path.display())));
    }
    let mut reader = ::csv::Reader::from_path(path).map_err(csv_err)?;
    reader
        .deserialize::<LedgerRow>()
        .map(|row| {
            let row = row.map_err(csv_err)?;
            Ok(LedgerEntry {
                timestamp: parse_timestamp(&row.datetime)?,
                action: row.action.parse()?,
                buy_price: row.buy_price,
                sell_price: row.sell_price,
                quantity: row.quantity,
                pnl_percent: row.pnl_percent,
                pnl_sum: row.pnl_sum,
                balance: row.balance,
            })
        })
        .collect()
}

/// Appends ledger rows to a CSV file as they happen.
///
/// The header is written only when the file is new or empty; each row is
/// flushed before `append` returns.
pub struct CsvLedgerSink {
    path: PathBuf,
    writer: Mutex<::csv::Writer<File>>,
}

impl CsvLedgerSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_parent(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(LEDGER_HEADER).map_err(csv_err)?;
            writer.flush()?;
        }
        info!(path = %path.display(), "Ledger file ready");
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerSink for CsvLedgerSink {
    async fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| Error::Other("ledger writer lock poisoned".into()))?;
        writer.write_record(ledger_record(entry)).map_err(csv_err)?;
        writer.flush()?;
        Ok(())
    }
}
