//! Command-line interface for the pool indexer.
//!
//! # Commands
//!
//! - `scan`: index a slot range, resume from the cursor, or follow the tip
//! - `pool <id>`: creation and swap history of one pool
//! - `orphans`: swaps whose pool never appeared (or, with `--pending`, still waiting)
//! - `gaps`: slots recorded as skipped for a job
//! - `status`: cursors and index counters
//! - `decode <signature>`: fetch one transaction and print its decoded events
//!
//! # Example
//!
//! ```bash
//! # Index a fixed range
//! solana-pool-indexer scan --from 250000000 --to 250000500
//!
//! # Resume from the cursor and keep following the chain
//! solana-pool-indexer scan --follow
//!
//! # Start at the first slot produced after a pool's open time
//! solana-pool-indexer scan --from-time 1700000000 --account 58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2
//!
//! # Look up a pool
//! solana-pool-indexer pool 58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2
//! ```

use crate::config::{parse_pubkey_list, validate_pubkey, Config, ScanConfig};
use crate::coordinator::{JobReport, JobState, ScanJob};
use crate::cursor::{CursorStore, JobKey};
use crate::db::create_pool;
use crate::decoder::DecoderRegistry;
use crate::error::{IndexerError, IndexerResult};
use crate::events::DomainEvent;
use crate::index::{PoolIndex, SwapRecord};
use crate::rpc::{ChainClient, Commitment, SolanaRpcClient};
use crate::scanner::{slot_at_time, TransactionFilter};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use eyre::WrapErr;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Solana DEX pool indexer
#[derive(Parser, Debug)]
#[command(name = "solana-pool-indexer")]
#[command(about = "Resumable Solana block scanner indexing pool creations and swaps", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Filter and commitment identifying a scan job.
#[derive(Args, Debug, Clone, Default)]
struct JobArgs {
    /// Program id to scan for (repeatable; default: PROGRAM_IDS)
    #[arg(long = "program")]
    programs: Vec<String>,

    /// Account key that must appear in the transaction (repeatable)
    #[arg(long = "account")]
    accounts: Vec<String>,

    /// Log fragment that must appear in the transaction logs (repeatable)
    #[arg(long = "log-contains")]
    log_contains: Vec<String>,

    /// Commitment level: confirmed or finalized (default: COMMITMENT)
    #[arg(long)]
    commitment: Option<Commitment>,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan slots and index pool creations and swaps
    Scan {
        /// First slot (default: one past the cursor, or the chain tip)
        #[arg(long)]
        from: Option<u64>,

        /// Start at the first slot produced at or after this unix time
        #[arg(long, conflicts_with = "from")]
        from_time: Option<i64>,

        /// Last slot, inclusive (default: the chain tip at start)
        #[arg(long)]
        to: Option<u64>,

        /// Keep polling for new slots after reaching the tip
        #[arg(long, conflicts_with = "to")]
        follow: bool,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Show a pool's creation and swap history
    Pool {
        /// Pool account
        id: String,
    },

    /// List orphaned swaps
    Orphans {
        /// List swaps still waiting for their pool instead
        #[arg(long)]
        pending: bool,
    },

    /// List slots recorded as gaps for a job
    Gaps {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Show cursors and index counters
    Status,

    /// Fetch a transaction and print its decoded events
    Decode {
        /// Transaction signature
        signature: String,

        /// Commitment level (default: COMMITMENT)
        #[arg(long)]
        commitment: Option<Commitment>,
    },
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration, the database or the RPC endpoint
/// fail, or if a scan job aborts.
pub async fn run() -> eyre::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().wrap_err("Failed to load configuration")?;

    match cli.command {
        Commands::Scan {
            from,
            from_time,
            to,
            follow,
            job,
        } => {
            let start = match from_time {
                Some(unix_time) => StartAt::Time(unix_time),
                None => StartAt::Slot(from),
            };
            run_scan_command(&config, start, to, follow, &job)
                .await
                .wrap_err("scan failed")
        }
        Commands::Pool { id } => run_pool_command(&config, &id)
            .await
            .wrap_err_with(|| format!("pool lookup for {id} failed")),
        Commands::Orphans { pending } => run_orphans_command(&config, pending)
            .await
            .wrap_err("orphan listing failed"),
        Commands::Gaps { job } => run_gaps_command(&config, &job).await.wrap_err("gap listing failed"),
        Commands::Status => run_status_command(&config).await.wrap_err("status failed"),
        Commands::Decode { signature, commitment } => {
            run_decode_command(&config, &signature, commitment.unwrap_or_else(|| config.commitment()))
                .await
                .wrap_err_with(|| format!("decoding {signature} failed"))
        }
    }
}

/// Where a scan starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartAt {
    /// Explicit slot, or the cursor / chain tip when `None`
    Slot(Option<u64>),
    /// First slot at or after a unix time
    Time(i64),
}

/// Build the job filter from flags, falling back to configured program ids.
fn job_filter(config: &Config, job: &JobArgs) -> IndexerResult<(TransactionFilter, Commitment)> {
    let programs = if job.programs.is_empty() {
        config.program_ids().to_vec()
    } else {
        parse_pubkey_list("--program", &job.programs.join(","))?
    };
    for account in &job.accounts {
        validate_pubkey("--account", account)?;
    }

    let filter = TransactionFilter::for_programs(programs)
        .with_accounts(job.accounts.iter().cloned())
        .with_log_substrings(job.log_contains.iter().cloned());
    Ok((filter, job.commitment.unwrap_or_else(|| config.commitment())))
}

async fn open_database(config: &Config) -> IndexerResult<SqlitePool> {
    let pool = create_pool(config.database_url()).await?;
    info!(database = config.database_url(), "Database ready");
    Ok(pool)
}

fn rpc_client(config: &Config) -> IndexerResult<SolanaRpcClient> {
    let client = SolanaRpcClient::new(config.rpc_url(), config.max_requests_per_second(), config.rpc_timeout())?;
    info!(host = client.host(), rps = config.max_requests_per_second(), "RPC client ready");
    Ok(client)
}

/// Execute the scan command.
async fn run_scan_command(
    config: &Config,
    start: StartAt,
    to: Option<u64>,
    follow: bool,
    job: &JobArgs,
) -> IndexerResult<()> {
    let (filter, commitment) = job_filter(config, job)?;
    let from = match start {
        StartAt::Slot(from) => from,
        StartAt::Time(_) => None,
    };
    let mut scan_config: ScanConfig = config.scan_config(filter, commitment).with_range(from, to);
    scan_config.follow = follow;
    scan_config.validate()?;

    let client: Arc<dyn ChainClient> = Arc::new(rpc_client(config)?);
    if let StartAt::Time(unix_time) = start {
        let slot = slot_at_time(client.as_ref(), commitment, &config.backoff(), unix_time).await?;
        let at = chrono::DateTime::from_timestamp(unix_time, 0)
            .map_or_else(|| unix_time.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        println!("{} {} is slot {}", "🕒".cyan(), at, slot.to_string().yellow());
        scan_config = scan_config.with_range(Some(slot), to);
        scan_config.validate()?;
    }

    let db = open_database(config).await?;
    let decoders = DecoderRegistry::with_builtin();
    for program in &scan_config.filter.program_ids {
        if !decoders.supports(program) {
            warn!(program = %program, "No decoder registered, instructions of this program are not indexed");
        }
    }

    let mut job = ScanJob::new(
        client,
        decoders,
        CursorStore::new(db.clone()),
        PoolIndex::new(db, config.index_options()),
        scan_config,
    );

    println!(
        "{} job {} ({})",
        "🔍 Scanning".cyan().bold(),
        job.job_key().short().yellow(),
        job.job_key().description().dimmed()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing the current slot");
            println!();
            println!("{}", "🛑 Stopping after the current slot...".yellow().bold());
            if stop_tx.send(true).is_err() {
                debug!("Scan job already finished");
            }
        }
    });

    let report = job.run(stop_rx).await;
    signal.abort();
    print_report(&report);

    match report.state {
        JobState::Aborted(reason) => Err(IndexerError::fatal(format!("Scan job aborted: {reason}"), None)),
        _ => Ok(()),
    }
}

/// Execute the pool command.
async fn run_pool_command(config: &Config, pool: &str) -> IndexerResult<()> {
    validate_pubkey("pool id", pool)?;
    let index = PoolIndex::new(open_database(config).await?, config.index_options());

    let Some(history) = index.query(pool).await? else {
        println!("{} {}", "Pool not indexed:".yellow().bold(), pool);
        return Ok(());
    };

    let creation = &history.creation;
    println!("{} {}", "🏊 Pool".cyan().bold(), creation.pool.yellow());
    println!("   program:  {}", creation.program_id);
    println!("   mints:    {}", creation.mints.join(", "));
    println!("   creator:  {}", creation.creator.as_deref().unwrap_or("-"));
    println!("   created:  slot {} tx {}", creation.position.slot, creation.signature.dimmed());
    println!("   swaps:    {}", history.swaps.len());
    println!();
    for swap in &history.swaps {
        print_swap(swap);
    }
    Ok(())
}

/// Execute the orphans command.
async fn run_orphans_command(config: &Config, pending: bool) -> IndexerResult<()> {
    let index = PoolIndex::new(open_database(config).await?, config.index_options());
    let swaps = if pending { index.pending().await? } else { index.orphans().await? };
    let label = if pending { "pending" } else { "orphaned" };

    if swaps.is_empty() {
        println!("{} No {label} swaps", "✅".green());
        return Ok(());
    }
    println!("{} {} {label} swaps", "⚠️".yellow(), swaps.len());
    for swap in &swaps {
        print_swap(swap);
    }
    Ok(())
}

/// Execute the gaps command.
async fn run_gaps_command(config: &Config, job: &JobArgs) -> IndexerResult<()> {
    let (filter, commitment) = job_filter(config, job)?;
    let key = JobKey::new(&filter, commitment);
    let cursors = CursorStore::new(open_database(config).await?);

    let gaps = cursors.gaps(&key).await?;
    println!("{} job {} ({})", "📭 Gaps".cyan().bold(), key.short().yellow(), key.description().dimmed());
    if gaps.is_empty() {
        println!("   none");
    }
    for gap in gaps {
        println!(
            "   slot {} [{}] {}",
            gap.slot.to_string().yellow(),
            gap.kind.as_str(),
            gap.reason.dimmed()
        );
    }
    Ok(())
}

/// Execute the status command.
async fn run_status_command(config: &Config) -> IndexerResult<()> {
    let db = open_database(config).await?;
    let cursors = CursorStore::new(db.clone()).all().await?;
    let stats = PoolIndex::new(db, config.index_options()).stats().await?;

    println!("{}", "📍 Cursors".cyan().bold());
    if cursors.is_empty() {
        println!("   no scan jobs yet");
    }
    for cursor in &cursors {
        let updated = chrono::DateTime::from_timestamp(cursor.updated_at, 0)
            .map_or_else(|| cursor.updated_at.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        println!(
            "   {} slot {} [{}] {} (updated {})",
            cursor.job_key[..12].yellow(),
            cursor.last_slot.to_string().green(),
            cursor.commitment,
            cursor.filter.dimmed(),
            updated
        );
    }

    println!();
    println!("{}", "📊 Index".cyan().bold());
    println!("   pools:              {}", stats.pools);
    println!("   attached swaps:     {}", stats.attached_swaps);
    println!("   pending swaps:      {}", stats.pending_swaps);
    println!("   orphan swaps:       {}", stats.orphan_swaps);
    println!("   invalidated events: {}", stats.invalidated_events);
    println!("   violations:         {}", stats.violations);
    println!("   decode anomalies:   {}", stats.anomalies);
    Ok(())
}

/// Execute the decode command.
async fn run_decode_command(config: &Config, signature: &str, commitment: Commitment) -> IndexerResult<()> {
    let client = rpc_client(config)?;
    let transaction = config
        .backoff()
        .retry("getTransaction", || client.get_transaction(signature, commitment))
        .await?;

    let Some(transaction) = transaction else {
        println!("{} {}", "Transaction not found:".yellow().bold(), signature);
        return Ok(());
    };

    let events = DecoderRegistry::with_builtin().decode_transaction(&transaction);
    println!(
        "{} {} (slot {}, {})",
        "🔎 Transaction".cyan().bold(),
        signature.yellow(),
        transaction.slot,
        if transaction.failed { "failed".red() } else { "ok".green() }
    );
    if events.is_empty() {
        println!("   no events from registered programs");
    }
    for event in &events {
        print_event(event);
    }
    Ok(())
}

fn print_event(event: &DomainEvent) {
    match event {
        DomainEvent::PoolCreated(e) => println!(
            "   {} {} pool {} mints {} creator {}",
            e.position.to_string().dimmed(),
            "PoolCreated".green().bold(),
            e.pool.yellow(),
            e.mints.join("/"),
            e.creator.as_deref().unwrap_or("-")
        ),
        DomainEvent::SwapExecuted(e) => println!(
            "   {} {} pool {} {} {} → {} {} by {}",
            e.position.to_string().dimmed(),
            "Swap".blue().bold(),
            e.pool.as_deref().unwrap_or("?").yellow(),
            e.amount_in,
            e.input_mint.as_deref().unwrap_or("?"),
            e.amount_out,
            e.output_mint.as_deref().unwrap_or("?"),
            e.trader
        ),
        DomainEvent::Unrecognized(e) => println!(
            "   {} {} {} {}",
            e.position.to_string().dimmed(),
            "Unrecognized".red().bold(),
            e.program_id,
            e.diagnostic.dimmed()
        ),
    }
}

fn print_swap(swap: &SwapRecord) {
    let status = match swap.orphan_reason.as_deref() {
        Some(reason) => format!("{} ({reason})", swap.status),
        None => swap.status.to_string(),
    };
    println!(
        "   {} {} {} {} → {} {} by {} [{}] {}",
        swap.position.to_string().dimmed(),
        swap.pool.as_deref().unwrap_or("?").yellow(),
        swap.amount_in,
        swap.input_mint.as_deref().unwrap_or("?"),
        swap.amount_out,
        swap.output_mint.as_deref().unwrap_or("?"),
        swap.trader,
        status,
        swap.signature.dimmed()
    );
}

fn print_report(report: &JobReport) {
    let stats = &report.stats;
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let state = match &report.state {
        JobState::Completed => "completed".green().bold(),
        JobState::Stopped => "stopped".yellow().bold(),
        other => other.to_string().red().bold(),
    };

    println!();
    println!("{} {} Scan {}", "📊".cyan(), timestamp.to_string().dimmed(), state);
    match (stats.first_slot, stats.last_slot) {
        (Some(first), Some(last)) => println!("   slots:     {first}..={last}"),
        _ => println!("   slots:     none"),
    }
    println!("   blocks:    {} ({} gaps)", stats.blocks, stats.gaps);
    println!(
        "   pools:     {} created, {} duplicates",
        stats.pools_created.to_string().green(),
        stats.duplicate_pools
    );
    println!(
        "   swaps:     {} attached, {} pending, {} promoted, {} orphaned",
        stats.swaps_attached.to_string().green(),
        stats.swaps_pending,
        stats.swaps_promoted,
        stats.expired
    );
    println!("   anomalies: {}  reorgs: {}  pauses: {}", stats.anomalies, stats.reorgs, stats.failures);
    match report.cursor {
        Some(cursor) => println!("   cursor:    {}", cursor.to_string().yellow()),
        None => println!("   cursor:    -"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAYDIUM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
    const WHIRLPOOL: &str = "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc";

    fn config() -> Config {
        Config::from_lookup(|_| None).expect("defaults are valid")
    }

    #[test]
    fn test_cli_parsing() {
        assert!(Cli::try_parse_from(["solana-pool-indexer", "status"]).is_ok());
        assert!(Cli::try_parse_from(["solana-pool-indexer", "orphans", "--pending"]).is_ok());
        assert!(Cli::try_parse_from(["solana-pool-indexer", "pool"]).is_err());
    }

    #[test]
    fn test_scan_command_arguments() {
        let cli = Cli::try_parse_from([
            "solana-pool-indexer",
            "scan",
            "--from",
            "100",
            "--to",
            "103",
            "--program",
            WHIRLPOOL,
            "--log-contains",
            "initialize2",
            "--commitment",
            "finalized",
        ])
        .expect("valid arguments");

        let Commands::Scan { from, to, follow, job, .. } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!((from, to, follow), (Some(100), Some(103), false));
        assert_eq!(job.commitment, Some(Commitment::Finalized));

        let (filter, commitment) = job_filter(&config(), &job).expect("filter");
        assert_eq!(commitment, Commitment::Finalized);
        assert!(filter.program_ids.contains(WHIRLPOOL));
        assert!(!filter.program_ids.contains(RAYDIUM));
    }

    #[test]
    fn test_scan_from_time() {
        let cli = Cli::try_parse_from(["solana-pool-indexer", "scan", "--from-time", "1700000000"])
            .expect("valid arguments");
        let Commands::Scan { from, from_time, .. } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!((from, from_time), (None, Some(1_700_000_000)));

        let both = Cli::try_parse_from([
            "solana-pool-indexer",
            "scan",
            "--from",
            "5",
            "--from-time",
            "1700000000",
        ]);
        assert!(both.is_err());
    }

    #[test]
    fn test_follow_conflicts_with_to() {
        let result = Cli::try_parse_from(["solana-pool-indexer", "scan", "--to", "5", "--follow"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_job_filter_defaults_and_validation() {
        let (filter, commitment) = job_filter(&config(), &JobArgs::default()).expect("filter");
        assert_eq!(commitment, Commitment::Confirmed);
        assert!(filter.program_ids.contains(RAYDIUM));

        let bad = JobArgs {
            accounts: vec!["not-a-key".to_string()],
            ..JobArgs::default()
        };
        assert!(matches!(job_filter(&config(), &bad), Err(IndexerError::ConfigError { .. })));
    }
}
