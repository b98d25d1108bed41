//! referral-ledger CLI: serve the referral API and operate the ledger offline.

mod server;

use clap::{Parser, Subcommand};
use referral_ledger::report::ReportData;
use referral_ledger::snapshot::{snapshot_hash, verify_snapshot_hash, LedgerSnapshot};
use referral_ledger::{
    AddressKey, Amount, ClaimFilter, Ledger, LedgerConfig, LedgerStore, MemoryStore, ReferralApi,
    SqliteStore,
};
use referral_ledger_report::render_report;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LedgerConfig::load_from_path(path)?,
        None => LedgerConfig::load()?,
    };
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Serve(args) => run_serve(&rt, &cli.db, config, args),
        Command::Show(args) => run_show(&open_ledger(&cli.db, config)?, args),
        Command::Link(args) => run_link(&rt, &open_ledger(&cli.db, config)?, args),
        Command::Volume(args) => run_volume(&rt, &open_ledger(&cli.db, config)?, args),
        Command::Claim(args) => run_claim(&rt, &open_ledger(&cli.db, config)?, args),
        Command::Leaderboard(args) => run_leaderboard(&open_ledger(&cli.db, config)?, args),
        Command::Claims(args) => run_claims(&open_ledger(&cli.db, config)?, args),
        Command::Settle(args) => run_settle(&open_ledger(&cli.db, config)?, args),
        Command::Export(args) => run_export(&open_ledger(&cli.db, config)?, args),
        Command::Verify(args) => run_verify(args),
        Command::Report(args) => run_report(&open_ledger(&cli.db, config)?, args),
    }
}

#[derive(Parser)]
#[command(name = "referral-ledger")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Referral & credit ledger: links, tiered commissions, claims, leaderboard")]
struct Cli {
    /// SQLite ledger file.
    #[arg(long, global = true, default_value = "./data/ledger.sqlite")]
    db: PathBuf,
    /// JSON config file (defaults to env / ./config lookup).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Show an account with its credit profile and referral link.
    Show(AddressArgs),
    /// Link an address to a referrer code (or referrer address).
    Link(LinkArgs),
    /// Record a volume event and accrue commissions.
    Volume(VolumeArgs),
    /// Claim the pending commission of an address.
    Claim(AddressArgs),
    /// Print the credit leaderboard.
    Leaderboard(LeaderboardArgs),
    /// List recorded claims.
    Claims(ClaimsArgs),
    /// Mark a claim as paid out.
    Settle(SettleArgs),
    /// Export a ledger snapshot and its SHA-256.
    Export(ExportArgs),
    /// Verify a snapshot against its .sha256 file.
    Verify(VerifyArgs),
    /// Generate a static HTML ledger report.
    Report(ReportArgs),
}

#[derive(Parser)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    /// Keep the ledger in memory instead of --db.
    #[arg(long)]
    in_memory: bool,
}

#[derive(Parser)]
struct AddressArgs {
    #[arg(long)]
    address: String,
}

#[derive(Parser)]
struct LinkArgs {
    #[arg(long)]
    address: String,
    #[arg(long)]
    code: String,
}

#[derive(Parser)]
struct VolumeArgs {
    #[arg(long)]
    address: String,
    #[arg(long)]
    amount: String,
}

#[derive(Parser)]
struct LeaderboardArgs {
    #[arg(long)]
    top: Option<usize>,
}

#[derive(Parser)]
struct ClaimsArgs {
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    unsettled: bool,
}

#[derive(Parser)]
struct SettleArgs {
    #[arg(long)]
    claim_id: u64,
    #[arg(long)]
    reference: String,
}

#[derive(Parser)]
struct ExportArgs {
    #[arg(long, default_value = "./reports/ledger.json")]
    out: PathBuf,
}

#[derive(Parser)]
struct VerifyArgs {
    #[arg(long)]
    snapshot: PathBuf,
}

#[derive(Parser)]
struct ReportArgs {
    #[arg(long, default_value = "./reports/ledger.html")]
    out: PathBuf,
}

fn open_store(
    db: &Path,
    config: &LedgerConfig,
) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    if let Some(dir) = db.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let store = SqliteStore::open(db, config.store_busy_timeout())?;
    Ok(Arc::new(store))
}

fn open_ledger(db: &Path, config: LedgerConfig) -> Result<Ledger, Box<dyn std::error::Error>> {
    let store = open_store(db, &config)?;
    Ok(Ledger::new(store, config))
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sha256_path(path: &Path) -> PathBuf {
    path.with_extension("sha256")
}

fn run_serve(
    rt: &tokio::runtime::Runtime,
    db: &Path,
    config: LedgerConfig,
    args: ServeArgs,
) -> CliResult {
    let store: Arc<dyn LedgerStore> = if args.in_memory {
        info!("serving an in-memory ledger");
        Arc::new(MemoryStore::new())
    } else {
        info!(db = %db.display(), "serving sqlite ledger");
        open_store(db, &config)?
    };
    let api = Arc::new(ReferralApi::new(Arc::new(Ledger::new(store, config))));
    rt.block_on(server::serve(api, args.bind))?;
    Ok(())
}

fn run_show(ledger: &Ledger, args: AddressArgs) -> CliResult {
    let key = AddressKey::parse(&args.address)?;
    let account = ledger.account(key.as_str())?;
    let profile = ledger.credit_profile(key.as_str())?;
    print_json(&serde_json::json!({
        "address": key,
        "code": key.referral_code(),
        "link": ledger.referral_link(&key),
        "account": account,
        "credits": profile,
    }))
}

fn run_link(rt: &tokio::runtime::Runtime, ledger: &Ledger, args: LinkArgs) -> CliResult {
    let outcome = rt.block_on(ledger.link_referrer(&args.address, &args.code))?;
    print_json(&serde_json::json!({
        "referrer": outcome.referrer(),
        "alreadyLinked": !outcome.is_new(),
    }))
}

fn run_volume(rt: &tokio::runtime::Runtime, ledger: &Ledger, args: VolumeArgs) -> CliResult {
    let volume = Amount::parse(&args.amount)?;
    let accrual = rt.block_on(ledger.record_volume(&args.address, volume))?;
    print_json(&accrual)
}

fn run_claim(rt: &tokio::runtime::Runtime, ledger: &Ledger, args: AddressArgs) -> CliResult {
    let claim = rt.block_on(ledger.claim(&args.address))?;
    print_json(&claim)
}

fn run_leaderboard(ledger: &Ledger, args: LeaderboardArgs) -> CliResult {
    let n = args.top.unwrap_or(ledger.config().leaderboard_size);
    print_json(&ledger.leaderboard(n)?)
}

fn run_claims(ledger: &Ledger, args: ClaimsArgs) -> CliResult {
    let address = args.address.as_deref().map(AddressKey::parse).transpose()?;
    let filter = ClaimFilter {
        address,
        unsettled_only: args.unsettled,
    };
    print_json(&ledger.claims(&filter)?)
}

fn run_settle(ledger: &Ledger, args: SettleArgs) -> CliResult {
    print_json(&ledger.settle_claim(args.claim_id, &args.reference)?)
}

fn run_export(ledger: &Ledger, args: ExportArgs) -> CliResult {
    let snapshot = LedgerSnapshot::capture(ledger)?;
    let hash = snapshot_hash(&snapshot)?;
    if let Some(dir) = args.out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let hash_path = sha256_path(&args.out);
    std::fs::write(&args.out, serde_json::to_string_pretty(&snapshot)?)?;
    std::fs::write(&hash_path, format!("{}\n", hash))?;
    info!(snapshot = ?args.out, ?hash_path, accounts = snapshot.accounts.len(), "export complete");
    println!("{}", hash);
    Ok(())
}

fn run_verify(args: VerifyArgs) -> CliResult {
    let snapshot = LedgerSnapshot::load(&args.snapshot)?;
    let expected = std::fs::read_to_string(sha256_path(&args.snapshot)).ok();
    let result = verify_snapshot_hash(&snapshot, expected.as_deref())?;
    if result.matches {
        println!("OK\t{}", result.snapshot_hash);
    } else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected={:?}",
            result.snapshot_hash, result.expected_hash
        );
        std::process::exit(1);
    }
    Ok(())
}

fn run_report(ledger: &Ledger, args: ReportArgs) -> CliResult {
    let data = ReportData::build(ledger)?;
    if let Some(dir) = args.out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    render_report(&data, &args.out)?;
    info!(html_path = ?args.out, hash = %data.snapshot_hash_sha256, "report complete");
    Ok(())
}
