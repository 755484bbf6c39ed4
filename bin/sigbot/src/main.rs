//! sigbot: fetch bars, generate signals, backtest them and run the live
//! position monitor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backtest::{clean_bars, resample, BacktestConfig, Backtester, PerformanceStats};
use common::{Config, ExchangeClient, Interval, LedgerSink, TradingMode};
use engine::{BybitClient, Monitor, MonitorConfig};
use paper::PaperClient;
use store::{CsvLedgerSink, SqliteLedgerSink};
use strategy::{SignalGenerator, StrategyFileConfig};

#[derive(Parser)]
#[command(name = "sigbot", about = "Signal backtester and live position monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download klines from Bybit into a CSV file.
    Fetch {
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
        #[arg(long, default_value = "1m")]
        interval: Interval,
        /// RFC 3339 timestamp or YYYY-MM-DD.
        #[arg(long, value_parser = parse_when)]
        start: DateTime<Utc>,
        /// Defaults to now.
        #[arg(long, value_parser = parse_when)]
        end: Option<DateTime<Utc>>,
        /// Fill gaps and drop duplicates before writing.
        #[arg(long, default_value_t = false)]
        clean: bool,
        /// Aggregate the fetched bars to this interval before writing.
        #[arg(long)]
        resample: Option<Interval>,
        #[arg(long, default_value = "data/bars.csv")]
        out: PathBuf,
    },
    /// Generate a signal file from bars using a strategy TOML file.
    Signals {
        /// Defaults to STRATEGY_CONFIG_PATH.
        #[arg(long)]
        strategy: Option<PathBuf>,
        #[arg(long, default_value = "data/bars.csv")]
        bars: PathBuf,
        #[arg(long, default_value = "data/signals.csv")]
        out: PathBuf,
    },
    /// Replay signals over bars and write the resulting ledger.
    Backtest {
        #[arg(long, default_value = "data/bars.csv")]
        bars: PathBuf,
        #[arg(long, default_value = "data/signals.csv")]
        signals: PathBuf,
        #[arg(long, default_value_t = 0.05)]
        tp: f64,
        #[arg(long, default_value_t = 0.03)]
        sl: f64,
        #[arg(long, default_value_t = 1000.0)]
        balance: f64,
        #[arg(long, default_value_t = 0.0005)]
        fee: f64,
        #[arg(long, default_value = "data/backtest_ledger.csv")]
        out: PathBuf,
        /// Also store the ledger in DATABASE_URL under this run name.
        #[arg(long)]
        run: Option<String>,
    },
    /// Print performance statistics of a ledger file.
    Stats {
        /// Defaults to LEDGER_PATH.
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long, default_value_t = 1000.0)]
        initial_balance: f64,
    },
    /// Follow the latest signal on the exchange until its validity expires.
    Monitor {
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
        #[arg(long, default_value = "data/signals.csv")]
        signals: PathBuf,
        #[arg(long, default_value_t = 0.05)]
        tp: f64,
        #[arg(long, default_value_t = 0.03)]
        sl: f64,
        /// Notional per entry in USDT.
        #[arg(long, default_value_t = 1000.0)]
        size: f64,
        /// Overrides the exchange taker fee.
        #[arg(long)]
        fee: Option<f64>,
        #[arg(long, default_value_t = 30)]
        poll_secs: u64,
        #[arg(long, default_value_t = 60)]
        validity_mins: u64,
        /// Run name for rows stored in DATABASE_URL.
        #[arg(long, default_value = "live")]
        run: String,
    },
}

fn parse_when(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| format!("invalid date '{raw}'"));
    }
    store::files::parse_timestamp(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env().context("loading configuration")?;

    match cli.command {
        Commands::Fetch {
            symbol,
            interval,
            start,
            end,
            clean,
            resample: target,
            out,
        } => {
            let end = end.unwrap_or_else(Utc::now);
            if start >= end {
                bail!("start ({start}) must be before end ({end})");
            }
            let client = BybitClient::from_config(&cfg)?;
            let mut bars = client.fetch_bars(&symbol, interval, start, end).await?;
            info!(%symbol, %interval, bars = bars.len(), "Fetched bars");
            if clean {
                bars = clean_bars(&bars, interval);
            }
            if let Some(target) = target {
                bars = resample(&bars, target);
            }
            store::write_bars(&out, &bars)?;
        }

        Commands::Signals {
            strategy,
            bars,
            out,
        } => {
            let path = strategy.unwrap_or_else(|| PathBuf::from(&cfg.strategy_config_path));
            let file = StrategyFileConfig::load(&path.to_string_lossy())?;
            let generator = SignalGenerator::from_config(&file)?;
            let bars = store::read_bars(&bars)?;
            let signals = generator.generate(&bars);
            store::write_signals(&out, &signals)?;
        }

        Commands::Backtest {
            bars,
            signals,
            tp,
            sl,
            balance,
            fee,
            out,
            run,
        } => {
            let config = BacktestConfig {
                tp,
                sl,
                initial_balance: balance,
                fee_rate: fee,
            };
            let backtester = Backtester::new(config)?;
            let bars = store::read_bars(&bars)?;
            let signals = store::read_signals(&signals)?;
            let outcome = backtester.run(&bars, &signals);

            store::write_ledger(&out, outcome.ledger.entries())?;
            if let Some(run) = run {
                let Some(url) = cfg.database_url.as_deref() else {
                    bail!("--run needs DATABASE_URL to be set");
                };
                let pool = store::connect(url).await?;
                store::save_ledger(&pool, &run, outcome.ledger.entries()).await?;
            }

            let stats = PerformanceStats::compute(outcome.ledger.entries(), balance);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if let Some(position) = &outcome.open_position {
                warn!(
                    side = %position.side,
                    entry = position.entry_price,
                    unrealized_pnl_percent = outcome.unrealized_pnl_percent,
                    "Position still open at end of data"
                );
            }
        }

        Commands::Stats {
            ledger,
            initial_balance,
        } => {
            let path = ledger.unwrap_or_else(|| PathBuf::from(&cfg.ledger_path));
            let entries = store::read_ledger(&path)?;
            let stats = PerformanceStats::compute(&entries, initial_balance);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Commands::Monitor {
            symbol,
            signals,
            tp,
            sl,
            size,
            fee,
            poll_secs,
            validity_mins,
            run,
        } => {
            let config = MonitorConfig {
                symbol,
                tp,
                sl,
                position_size_usdt: size,
                fee_rate: fee,
                poll_interval: Duration::from_secs(poll_secs),
                signal_validity: Duration::from_secs(validity_mins * 60),
                ..MonitorConfig::default()
            };
            let signals = store::read_signals(&signals)?;
            let exchange = exchange_for(&cfg, &config).await?;
            let sink = sink_for(&cfg, &run).await?;

            let mut monitor = Monitor::start(config, exchange, sink, signals).await?;
            let report = monitor.run().await?;
            info!(
                exit = ?report.exit,
                ticks = report.ticks,
                failed = report.failed_ticks,
                rows = report.ledger.len(),
                balance = report.final_balance,
                "Monitor finished"
            );
        }
    }
    Ok(())
}

/// Bybit in live mode. In paper mode, a `PaperClient` fed with Bybit's
/// public ticker so its brackets fire on real prices.
async fn exchange_for(cfg: &Config, monitor: &MonitorConfig) -> Result<Arc<dyn ExchangeClient>> {
    let bybit = BybitClient::from_config(cfg)?;
    match cfg.trading_mode {
        TradingMode::Live => {
            info!(env = ?cfg.bybit_env, "Live trading mode, using BybitClient");
            Ok(Arc::new(bybit))
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperClient");
            let paper = Arc::new(PaperClient::new(cfg.paper_balance, cfg.paper_slippage_bps));
            paper
                .follow_prices(Arc::new(bybit), &monitor.symbol, monitor.poll_interval)
                .await
                .context("seeding paper prices from the Bybit ticker")?;
            Ok(paper)
        }
    }
}

async fn sink_for(cfg: &Config, run: &str) -> Result<Arc<dyn LedgerSink>> {
    match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = store::connect(url).await?;
            Ok(Arc::new(SqliteLedgerSink::new(pool, run)))
        }
        None => Ok(Arc::new(CsvLedgerSink::open(&cfg.ledger_path)?)),
    }
}
