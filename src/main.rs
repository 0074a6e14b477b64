use std::path::PathBuf;
use std::process;

use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use keywarden::{
    Config, Error, Expiring, Gpg, KeySync, Keyserver, PersistedKey, Result, SqliteStore, TestReport,
    normalize_fingerprint,
};
use tracing_subscriber::EnvFilter;

type Engine = KeySync<Keyserver, Gpg, SqliteStore>;

/// Keep track of OpenPGP keys: expiry, revocation and best practice.
#[derive(Parser, Debug)]
#[command(
    name = "keywarden",
    version,
    about,
    after_help = "Examples:\n  keywarden show A999B7498D1A8DC473E53C92309F635DAD1B5517\n  keywarden import key.asc 0xA999B7498D1A8DC473E53C92309F635DAD1B5517\n  keywarden sync\n  keywarden test A999B7498D1A8DC473E53C92309F635DAD1B5517\n  keywarden test --file key.asc\n  keywarden purge-reports --older-than-hours 12"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, default_value = "keywarden.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a key, syncing it from the keyserver if it is new or stale.
    Show {
        fingerprint: String,

        /// Resync if the stored copy is older than this.
        #[arg(long)]
        max_staleness_hours: Option<i64>,
    },

    /// Sync a key from a local ASCII-armored file instead of the keyserver.
    Import { file: PathBuf, fingerprint: String },

    /// Sync the given fingerprints plus every stored key that is due.
    Sync { fingerprints: Vec<String> },

    /// Run the best-practice checks against a key and store the report.
    Test {
        #[arg(required_unless_present = "file")]
        fingerprint: Option<String>,

        /// Check an ASCII-armored public key from this file instead of the keyserver copy.
        #[arg(long, conflicts_with = "fingerprint")]
        file: Option<PathBuf>,
    },

    /// Delete stored test reports older than the cutoff.
    PurgeReports {
        #[arg(long)]
        older_than_hours: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "keywarden=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        match &e {
            Error::NoSuchKey(_) => eprintln!("[keywarden] key not found: {e}"),
            _ => eprintln!("[keywarden] error: {e}"),
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let engine = KeySync::new(
        config.clone(),
        Keyserver::from_config(&config)?,
        Gpg::from_config(&config),
        SqliteStore::open(&config.store_path)?,
    );

    match cli.command {
        Command::Show {
            fingerprint,
            max_staleness_hours,
        } => run_show(&engine, &fingerprint, max_staleness_hours).await,
        Command::Import { file, fingerprint } => run_import(&engine, &file, &fingerprint).await,
        Command::Sync { fingerprints } => run_sync(&engine, &fingerprints).await,
        Command::Test { fingerprint, file } => run_test(&engine, fingerprint.as_deref(), file.as_deref()).await,
        Command::PurgeReports { older_than_hours } => {
            let older_than = older_than_hours
                .map(TimeDelta::hours)
                .unwrap_or_else(|| config.test_report_max_age());
            let deleted = engine.purge_test_reports(older_than).await?;
            println!("Deleted {deleted} old test results");
            Ok(())
        }
    }
}

async fn run_show(engine: &Engine, fingerprint: &str, max_staleness_hours: Option<i64>) -> Result<()> {
    let fingerprint = normalize_fingerprint(fingerprint)?;
    let max_staleness = max_staleness_hours
        .map(TimeDelta::hours)
        .unwrap_or_else(|| engine.config().max_staleness());

    let key = engine.get_or_sync(&fingerprint, max_staleness).await?;
    print_key(&key);
    Ok(())
}

async fn run_import(engine: &Engine, file: &std::path::Path, fingerprint: &str) -> Result<()> {
    let fingerprint = normalize_fingerprint(fingerprint)?;
    let armored = tokio::fs::read(file).await?;

    let key = engine.import(&fingerprint, &armored).await?;
    print_key(&key);
    Ok(())
}

async fn run_sync(engine: &Engine, fingerprints: &[String]) -> Result<()> {
    let candidates = fingerprints
        .iter()
        .map(|fp| normalize_fingerprint(fp))
        .collect::<Result<Vec<_>>>()?;

    let summary = engine
        .sync_due_keys(&candidates, engine.config().max_staleness())
        .await?;
    println!(
        "{} new, {} never synced, {} stale: {} synced, {} skipped (broken), {} failed",
        summary.new_keys,
        summary.never_synced,
        summary.stale,
        summary.synced,
        summary.skipped,
        summary.failed
    );
    Ok(())
}

async fn run_test(engine: &Engine, fingerprint: Option<&str>, file: Option<&std::path::Path>) -> Result<()> {
    let report = match file {
        Some(file) => {
            let armored = tokio::fs::read(file).await?;
            engine.evaluate_armored(&armored).await?
        }
        None => {
            let fingerprint = normalize_fingerprint(fingerprint.unwrap_or_default())?;
            engine.evaluate(&fingerprint).await?
        }
    };
    print_report(&report);
    Ok(())
}

fn print_key(key: &PersistedKey) {
    let today = Utc::now().date_naive();

    println!("Fingerprint: {}", key.human_fingerprint());
    println!("Type:        {}", key.friendly_type());
    if let Some(created) = key.created_date {
        println!("Created:     {created}");
    }
    match key.expiry_date {
        Some(expiry) => println!("Expires:     {expiry}"),
        None => println!("Expires:     never"),
    }
    if key.revoked {
        println!("Revoked:     yes");
    }
    println!("Can be used for: {}", key.friendly_capabilities().join(", "));
    for uid in &key.uids {
        println!("UID:         {}", uid.uid_string);
    }
    for subkey in &key.subkeys {
        let status = if subkey.key.revoked {
            "revoked"
        } else if subkey.key.has_expired(today) {
            "expired"
        } else {
            "valid"
        };
        println!(
            "Subkey:      0x{} {} [{}] ({status})",
            subkey.key.long_id,
            subkey.key.friendly_type(),
            subkey
                .key
                .capabilities
                .iter()
                .map(|c| c.as_char())
                .collect::<String>()
        );
    }
    for alert in &key.alerts {
        println!("[{}] {}", alert.severity, alert.text);
    }
}

fn print_report(report: &TestReport) {
    println!("Test report {} for {}", report.id, report.fingerprint);
    for outcome in report.outcomes() {
        let verdict = match outcome.result {
            Some(true) => "pass",
            Some(false) => "FAIL",
            None => "n/a",
        };
        println!("{verdict:>5}  {}: {}", outcome.test.name, outcome.test.description);
    }
}
