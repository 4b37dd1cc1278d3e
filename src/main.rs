//! Pair Slot Allocator - Main Entry Point
//!
//! Paper trading host: runs the signal lifecycle against the in-memory broker.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pair_slot_allocator::broker::{Broker, MockBroker};
use pair_slot_allocator::config::Config;
use pair_slot_allocator::persistence::SignalLog;
use pair_slot_allocator::portfolio::Portfolio;
use pair_slot_allocator::signal::{load_batch, Signal};
use pair_slot_allocator::strategy::{RebalanceAction, RebalanceEngine, TickReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Pair Slot Allocator CLI
#[derive(Parser)]
#[command(name = "pair-slot-allocator")]
#[command(version, about = "Slot-constrained pair trading signal lifecycle")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the paper trading loop
    Run {
        /// JSON signal batch to admit before the first tick
        #[arg(short, long)]
        signals: Option<PathBuf>,

        /// Stop after this many optimization ticks
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Path to SQLite database (overrides persistence.db_path)
        #[arg(short, long)]
        db: Option<PathBuf>,
    },

    /// Admit a JSON signal batch into the persisted portfolio
    Intake {
        /// Path to the JSON signal batch
        #[arg(short, long)]
        signals: PathBuf,

        /// Path to SQLite database (overrides persistence.db_path)
        #[arg(short, long)]
        db: Option<PathBuf>,
    },

    /// Show the persisted followed pool
    Status {
        /// Path to SQLite database (overrides persistence.db_path)
        #[arg(short, long)]
        db: Option<PathBuf>,

        /// Show recent target positions
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Counters for the paper trading session.
#[derive(Debug)]
struct RunStats {
    start_time: DateTime<Utc>,
    ticks: u64,
    closed: usize,
    replaced: usize,
    promoted: usize,
    errors: u64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            ticks: 0,
            closed: 0,
            replaced: 0,
            promoted: 0,
            errors: 0,
        }
    }
}

impl RunStats {
    fn absorb(&mut self, report: &TickReport) {
        self.closed += report.count(RebalanceAction::Close);
        self.replaced += report.count(RebalanceAction::Replace);
        self.promoted += report.admitted.len();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Run { signals, ticks, db }) => {
            run_paper(config, signals.as_deref(), ticks, db).await
        }
        Some(Commands::Intake { signals, db }) => run_intake(config, &signals, db).await,
        Some(Commands::Status { db, verbose }) => {
            let db_path = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_status(&db_path, verbose)
        }
        None => run_paper(config, None, None, None).await,
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "pair-slot-allocator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pair_slot_allocator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Account: {}", config.broker.account);
    info!("   Slot Capacity: {}", config.portfolio.slot_capacity);
    info!("   Budget: ${}", config.portfolio.budget);
    info!("   Divergence Factor: {}x", config.portfolio.divergence_factor);
    info!("   Price Source: {:?}", config.portfolio.price_source);
    info!("   Tick Interval: {}s", config.schedule.tick_interval_secs);
    info!("   Signal Log: {}", config.persistence.db_path.display());
}

fn open_log(path: &Path) -> Result<SignalLog> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SignalLog::new(path)
}

/// Put every snapshot ask of the batch on the paper broker's quote board.
async fn seed_quotes(broker: &MockBroker, signals: &[Signal]) {
    for signal in signals {
        for ticker in signal.pair().tickers() {
            if let Some(ask) = signal.snapshot_ask(ticker) {
                broker.set_quote(ticker, ask, ask).await;
            }
        }
    }
}

/// Restore the persisted portfolio, or start empty when the log has no state.
///
/// The paper broker only knows quotes seeded from signal files, so stored
/// pairs need their tickers present in the batch passed on the command line.
async fn load_portfolio(
    config: &Config,
    broker: &MockBroker,
    log: &SignalLog,
) -> Result<Portfolio> {
    let account = &config.broker.account;

    if !log.has_state()? {
        info!("📂 [PERSISTENCE] No previous state found, starting with empty slots");
        return Ok(Portfolio::from_config(account, &config.portfolio)?);
    }

    let portfolio = Portfolio::restore(account, &config.portfolio, broker, log)
        .await
        .context("Failed to restore followed pool (pass a signal file quoting the stored tickers)")?;

    // Recreate the held legs on the paper account
    let held: HashMap<String, i64> = portfolio
        .followed()
        .records()
        .into_iter()
        .flat_map(|r| {
            let pair = r.pair();
            [
                (pair.ticker_a().to_string(), r.shares_a),
                (pair.ticker_b().to_string(), r.shares_b),
            ]
        })
        .collect();
    broker.apply_adjustments(&held).await?;

    info!(
        "📂 [PERSISTENCE] Restored {} followed pair(s), {} empty slot(s)",
        portfolio.occupied_slots(),
        portfolio.empty_slots()
    );
    Ok(portfolio)
}

async fn run_paper(
    config: Config,
    signals_path: Option<&Path>,
    max_ticks: Option<u64>,
    db: Option<PathBuf>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║       Pair Slot Allocator v{} - Paper Trading          ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(&config);

    let db_path = db.unwrap_or_else(|| config.persistence.db_path.clone());
    let log = open_log(&db_path)?;

    let broker = Arc::new(MockBroker::new(config.broker.account.clone()));
    let signals = match signals_path {
        Some(path) => load_batch(path)?,
        None => Vec::new(),
    };
    seed_quotes(&broker, &signals).await;

    let mut portfolio = load_portfolio(&config, &broker, &log).await?;
    let engine = RebalanceEngine::new(Arc::clone(&broker), &config.portfolio).with_log(log);
    let mut stats = RunStats::default();

    if !signals.is_empty() {
        let report = engine.intake(&mut portfolio, signals)?;
        if let Some(e) = &report.persist_error {
            warn!("⚠️  [PERSISTENCE] {}", e);
        }
        broker.apply_adjustments(&report.adjustments).await?;
        info!(
            "📥 [INTAKE] Admitted {}, ignored {}",
            report.admitted.len(),
            report.ignored.len()
        );
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    info!("🚀 Starting optimization loop...");
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.schedule.tick_interval_secs));

    while !shutdown.load(Ordering::SeqCst) {
        if max_ticks.is_some_and(|max| stats.ticks >= max) {
            break;
        }
        interval.tick().await;
        stats.ticks += 1;

        match engine.optimize(&mut portfolio).await {
            Ok(report) => {
                if let Some(e) = &report.persist_error {
                    warn!("⚠️  [PERSISTENCE] {}", e);
                }
                if let Err(e) = broker.apply_adjustments(&report.adjustments).await {
                    error!("❌ [FILL] Failed to apply targets: {}", e);
                    stats.errors += 1;
                }
                stats.absorb(&report);
                log_tick(stats.ticks, &report, &portfolio);
            }
            Err(e) if e.is_precondition() => {
                error!("❌ [TICK {}] Aborted on invalid data: {}", stats.ticks, e);
                stats.errors += 1;
            }
            Err(e) => {
                warn!("⚠️  [TICK {}] Broker unavailable, skipping: {}", stats.ticks, e);
                stats.errors += 1;
            }
        }
    }

    log_summary(&stats, &portfolio, broker.as_ref()).await;
    info!("👋 Pair Slot Allocator shutdown complete");
    Ok(())
}

fn log_tick(tick: u64, report: &TickReport, portfolio: &Portfolio) {
    if report.is_noop() {
        info!("⏸  [TICK {}] No open positions", tick);
        return;
    }

    for decision in &report.decisions {
        match (decision.action, &decision.replacement) {
            (RebalanceAction::Hold, _) => {}
            (RebalanceAction::Replace, Some(next)) => info!(
                "🔄 [TICK {}] {} replaced by {} (potential {})",
                tick, decision.pair, next, decision.expected_potential
            ),
            (action, _) => info!(
                "📤 [TICK {}] {} {:?} (pnl {}, potential {})",
                tick, decision.pair, action, decision.current_pnl, decision.expected_potential
            ),
        }
    }

    info!(
        "📊 [TICK {}] {} target(s), {}/{} slots used, {} ignored",
        tick,
        report.adjustments.len(),
        portfolio.occupied_slots(),
        portfolio.slot_capacity(),
        portfolio.ignored().len()
    );
}

async fn log_summary(stats: &RunStats, portfolio: &Portfolio, broker: &MockBroker) {
    let uptime = Utc::now() - stats.start_time;
    let open = broker
        .positions(portfolio.account())
        .await
        .map(|p| p.len())
        .unwrap_or(0);

    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║                    SESSION SUMMARY                         ║");
    info!("╠════════════════════════════════════════════════════════════╣");
    info!("║ Uptime:    {}m", uptime.num_minutes());
    info!("║ Ticks:     {}", stats.ticks);
    info!("║ Closed:    {}", stats.closed);
    info!("║ Replaced:  {}", stats.replaced);
    info!("║ Promoted:  {}", stats.promoted);
    info!("║ Fills:     {}", broker.fill_count());
    info!("║ Errors:    {}", stats.errors);
    info!(
        "║ Slots:     {}/{} used, {} open legs",
        portfolio.occupied_slots(),
        portfolio.slot_capacity(),
        open
    );
    info!("╚════════════════════════════════════════════════════════════╝");
}

async fn run_intake(config: Config, signals_path: &Path, db: Option<PathBuf>) -> Result<()> {
    let db_path = db.unwrap_or_else(|| config.persistence.db_path.clone());
    let log = open_log(&db_path)?;

    let signals = load_batch(signals_path)?;
    let broker = Arc::new(MockBroker::new(config.broker.account.clone()));
    seed_quotes(&broker, &signals).await;

    let mut portfolio = load_portfolio(&config, &broker, &log).await?;
    let engine = RebalanceEngine::new(broker, &config.portfolio).with_log(log);
    let report = engine.intake(&mut portfolio, signals)?;

    if let Some(e) = report.persist_error {
        return Err(e.into());
    }

    println!("\n📥 Intake from {}", signals_path.display());
    for pair in &report.admitted {
        println!("   ├─ followed: {}", pair);
    }
    for pair in &report.ignored {
        println!("   ├─ ignored:  {}", pair);
    }
    println!(
        "   └─ {}/{} slots used",
        portfolio.occupied_slots(),
        portfolio.slot_capacity()
    );

    if !report.adjustments.is_empty() {
        let mut targets: Vec<_> = report.adjustments.iter().collect();
        targets.sort();
        println!("\n🎯 Target Positions");
        for (ticker, shares) in targets {
            println!("   ├─ {:<8} {:>8}", ticker, shares);
        }
    }
    println!();
    Ok(())
}

/// Show the persisted followed pool.
fn show_status(db_path: &Path, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              PAIR SLOT ALLOCATOR STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !db_path.exists() {
        println!("\n❌ Database not found: {}", db_path.display());
        println!("   No signals have been admitted yet, or the database path is incorrect.");
        return Ok(());
    }

    let log = SignalLog::new(db_path)?;
    let followed = log.load_followed()?;

    if followed.is_empty() {
        println!("\n❌ No followed signals in the log.");
    } else {
        println!("\n🔓 Followed Pairs ({})", followed.len());
        for entry in &followed {
            println!("   ┌─ {}", entry.pair);
            println!("   ├─ Expected Return: {}", entry.expected_return);
            println!(
                "   ├─ Shares:          {} {} / {} {}",
                entry.shares_a,
                entry.pair.ticker_a(),
                entry.shares_b,
                entry.pair.ticker_b()
            );
            if verbose {
                println!(
                    "   ├─ Hedge:           {} + {} x (threshold {})",
                    entry.hedge.constant, entry.hedge.slope, entry.hedge.threshold
                );
                println!("   ├─ Direction:       {:?}", entry.direction);
            }
            println!(
                "   └─ Saved:           {}",
                entry.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if verbose {
        let history = log.recent_adjustments(20)?;
        if !history.is_empty() {
            println!("\n📜 Recent Targets");
            for record in &history {
                println!(
                    "   ├─ {} {:<8} {:>8} ({})",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.ticker,
                    record.target_shares,
                    record.reason
                );
            }
        }
    }

    println!();
    Ok(())
}
