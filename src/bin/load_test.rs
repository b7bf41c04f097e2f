//! SessionBuf Load Test Binary
//!
//! Drives a file-backed buffer with concurrent producers, deletes some of the
//! referenced accounts before the flush, and checks that the outcome accounts
//! for every submitted event.
//! Run with: `cargo run --bin load_test -- [OPTIONS]`
//!
//! # Examples
//!
//! ```bash
//! # Default: 10 000 events over 50 accounts, 10% of accounts deleted
//! cargo run --release --bin load_test
//!
//! # Heavier run with debug logging from the writer
//! RUST_LOG=sessionbuf=debug cargo run --release --bin load_test -- --events 200000 --stale-accounts 25
//! ```

use std::time::{Duration, Instant};

use rusqlite::params;
use tracing_subscriber::EnvFilter;

use sessionbuf::reader::{count_account_events, count_session_events};
use sessionbuf::{AccountId, BufferConfig, ClientId, PendingEvent, SessionBuffer, TokenId};

/// Load test configuration
struct Config {
    /// Total number of events to submit
    num_events: usize,
    /// Number of seeded accounts (each with one client and one token)
    num_accounts: usize,
    /// Accounts deleted after submission, before the flush
    stale_accounts: usize,
    /// Number of concurrent producer tasks
    concurrency: usize,
    /// Path to database file (or temp if None)
    db_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_events: 10_000,
            num_accounts: 50,
            stale_accounts: 5,
            concurrency: 10,
            db_path: None,
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--events" | "-e" => {
                i += 1;
                config.num_events = args[i].parse().expect("Invalid --events value");
            }
            "--accounts" | "-a" => {
                i += 1;
                config.num_accounts = args[i].parse().expect("Invalid --accounts value");
            }
            "--stale-accounts" | "-s" => {
                i += 1;
                config.stale_accounts = args[i].parse().expect("Invalid --stale-accounts value");
            }
            "--concurrency" | "-c" => {
                i += 1;
                config.concurrency = args[i].parse().expect("Invalid --concurrency value");
            }
            "--db" | "-d" => {
                i += 1;
                config.db_path = Some(args[i].clone());
            }
            "--help" | "-h" => {
                println!(
                    r#"SessionBuf Load Test

Usage: load_test [OPTIONS]

Options:
  -e, --events <N>          Total events to submit (default: 10000)
  -a, --accounts <N>        Seeded accounts (default: 50)
  -s, --stale-accounts <N>  Accounts deleted before the flush (default: 5)
  -c, --concurrency <N>     Concurrent producer tasks (default: 10)
  -d, --db <PATH>           Database path (default: temp file)
  -h, --help                Show this help
"#
                );
                std::process::exit(0);
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Err(msg) = config.validate() {
        eprintln!("{}", msg);
        std::process::exit(1);
    }

    config
}

impl Config {
    fn validate(&self) -> Result<(), String> {
        if self.num_accounts == 0 {
            return Err("--accounts must be positive".to_string());
        }
        if self.stale_accounts > self.num_accounts {
            return Err("--stale-accounts cannot exceed --accounts".to_string());
        }
        if self.concurrency == 0 {
            return Err("--concurrency must be positive".to_string());
        }
        Ok(())
    }
}

/// Spreads a producer's events across the seeded owners.
fn owner_index(task_id: usize, seq: usize, num_accounts: usize) -> usize {
    (task_id + seq * 7) % num_accounts
}

#[derive(Clone, Copy)]
struct Owner {
    account: AccountId,
    client: ClientId,
    token: TokenId,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sessionbuf=info")),
        )
        .init();

    let config = parse_args();

    println!("SessionBuf Load Test");
    println!("====================");
    println!("Events:         {}", config.num_events);
    println!("Accounts:       {}", config.num_accounts);
    println!("Stale accounts: {}", config.stale_accounts);
    println!("Concurrency:    {}", config.concurrency);
    println!();

    // Setup database
    let temp_dir = std::env::temp_dir().join(format!("sessionbuf-load-{}", std::process::id()));
    std::fs::create_dir_all(&temp_dir).expect("create temp dir");
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| temp_dir.join("load.db").to_string_lossy().to_string());

    println!("Database:       {}", db_path);
    println!();

    // Nothing flushes until the stale accounts are gone.
    let buffer_config = BufferConfig::default()
        .with_flush_threshold(config.num_events + 1)
        .with_flush_interval(Duration::from_secs(24 * 60 * 60));
    let buffer = SessionBuffer::open(&db_path, buffer_config).expect("open session buffer");

    // Seed entities
    let admin = rusqlite::Connection::open(&db_path).expect("open admin connection");
    admin
        .busy_timeout(Duration::from_secs(5))
        .expect("set busy timeout");
    admin
        .execute_batch("PRAGMA foreign_keys = ON")
        .expect("enable foreign keys");
    let owners: Vec<Owner> = (0..config.num_accounts)
        .map(|_| Owner {
            account: AccountId::new_v4(),
            client: ClientId::new_v4(),
            token: TokenId::new_v4(),
        })
        .collect();
    for owner in &owners {
        admin
            .execute("INSERT INTO accounts (id) VALUES (?)", params![owner.account.to_string()])
            .expect("seed account");
        admin
            .execute(
                "INSERT INTO clients (account_id, id) VALUES (?, ?)",
                params![owner.account.to_string(), owner.client.to_string()],
            )
            .expect("seed client");
        admin
            .execute(
                "INSERT INTO tokens (account_id, id) VALUES (?, ?)",
                params![owner.account.to_string(), owner.token.to_string()],
            )
            .expect("seed token");
    }

    println!("Submitting...");
    let start = Instant::now();

    let mut handles = Vec::new();
    let events_per_task = config.num_events / config.concurrency;
    let remainder = config.num_events % config.concurrency;

    for task_id in 0..config.concurrency {
        let b = buffer.clone();
        let owners = owners.clone();
        let count = events_per_task + usize::from(task_id < remainder);

        let handle = tokio::spawn(async move {
            for i in 0..count {
                let owner = owners[owner_index(task_id, i, owners.len())];
                let event = PendingEvent::new(owner.account, owner.client, owner.token, "session.started")
                    .with_remote_addr(format!("198.51.100.{}", i % 250))
                    .with_payload(serde_json::json!({ "task": task_id, "seq": i }));
                b.submit(event).await.expect("submit");
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.expect("producer task panicked");
    }
    let submit_elapsed = start.elapsed();

    // Delete stale accounts; the cascade removes their clients and tokens.
    for owner in owners.iter().take(config.stale_accounts) {
        admin
            .execute("DELETE FROM accounts WHERE id = ?", params![owner.account.to_string()])
            .expect("delete account");
    }
    let expected_skipped = (0..config.concurrency)
        .flat_map(|task_id| {
            let count = events_per_task + usize::from(task_id < remainder);
            (0..count).map(move |i| owner_index(task_id, i, config.num_accounts))
        })
        .filter(|&index| index < config.stale_accounts)
        .count();

    println!("Flushing...");
    let flush_start = Instant::now();
    let pending = buffer.pending().await.expect("pending");
    let outcome = buffer.flush().await.expect("flush");
    let flush_elapsed = flush_start.elapsed();

    println!();
    println!("Results");
    println!("-------");
    println!("Pending at flush: {}", pending);
    println!("Inserted:         {}", outcome.inserted);
    println!("Skipped:          {}", outcome.skipped);
    println!("Submit duration:  {:?}", submit_elapsed);
    println!("Flush duration:   {:?}", flush_elapsed);
    println!(
        "Throughput:       {:.2} events/sec",
        config.num_events as f64 / (submit_elapsed + flush_elapsed).as_secs_f64()
    );
    println!();

    // Verify invariants
    println!("Verifying invariants...");

    assert_eq!(pending, config.num_events, "pending count mismatch");
    assert_eq!(
        outcome.total(),
        config.num_events,
        "inserted + skipped must equal submitted"
    );
    println!("  Accounting:        inserted + skipped == submitted ✓");

    assert_eq!(outcome.skipped, expected_skipped, "skipped count mismatch");
    let reader = buffer.open_reader().expect("open reader");
    for owner in owners.iter().take(config.stale_accounts) {
        let rows = count_account_events(&reader, owner.account).expect("count");
        assert_eq!(rows, 0, "stale account rows reached the database");
    }
    println!("  Stale accounts:    {} events skipped, none persisted ✓", expected_skipped);

    let persisted = count_session_events(&reader).expect("count");
    assert_eq!(persisted, outcome.inserted as u64, "database row count mismatch");
    println!("  Database:          {} rows ✓", persisted);

    buffer.shutdown().await.expect("shutdown");

    println!();
    println!("Load test PASSED ✓");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert_eq!(config.validate().unwrap_err(), "--concurrency must be positive");
    }

    #[test]
    fn test_more_stale_accounts_than_accounts_rejected() {
        let config = Config {
            num_accounts: 2,
            stale_accounts: 3,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
