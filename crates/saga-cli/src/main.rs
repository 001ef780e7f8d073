//! `saga-cli`: inspección de ejecuciones persistidas en Postgres.
//!
//! `saga-cli key <job_class> <unique_by>` no necesita base de datos; el resto
//! de los subcomandos lee `DATABASE_URL` (o `--database-url`).

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use saga_core::{idempotency_key, EntryLog, Execution, ExecutionStore, ValueStore};
use saga_persistence::{build_pool, DbConfig, PersistenceError, PgStore, PoolProvider};

/// Inspect durable saga executions.
#[derive(Parser, Debug)]
#[command(name = "saga-cli", version, about, long_about = None)]
struct Cli {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Output JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the idempotency key for a job class and its unique_by value.
    Key {
        job_class: String,
        /// unique_by as JSON.
        unique_by: String,
    },
    /// Show an execution and its entry log.
    Show {
        /// Idempotency key (64 hex chars).
        key: String,
    },
    /// List the context values of an execution.
    Context { key: String },
    /// List the most recently updated executions.
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid JSON for unique_by: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("DATABASE_URL is required for this command")]
    MissingDatabaseUrl,
    #[error("no execution with key {0}")]
    UnknownKey(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Store(#[from] saga_core::StoreError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidJson(_) | CliError::MissingDatabaseUrl => 2,
            CliError::UnknownKey(_) => 4,
            CliError::Persistence(_) | CliError::Store(_) => 5,
        }
    }
}

type Store = PgStore<PoolProvider>;

const POOL_SIZE: u32 = 2;

fn connect(url: Option<&str>) -> Result<Store, CliError> {
    let cfg = DbConfig::new(url.ok_or(CliError::MissingDatabaseUrl)?);
    let pool = build_pool(&cfg.url, 1, POOL_SIZE)?;
    Ok(PgStore::new(PoolProvider { pool }))
}

fn load_by_key(store: &Store, key: &str) -> Result<Execution, CliError> {
    store.find_execution_by_key(key)?
         .ok_or_else(|| CliError::UnknownKey(key.to_string()))
}

fn compute_key(job_class: &str, unique_by: &str) -> Result<String, CliError> {
    let unique_by: Value = serde_json::from_str(unique_by)?;
    Ok(idempotency_key(job_class, &unique_by))
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()));
}

fn summary(e: &Execution) -> String {
    format!("{}  {}  class={}  recover_to={}  steps={}  updated_at={}",
            e.id,
            e.idempotency_key,
            e.serialized_job.job_class,
            e.recover_to,
            e.definition.len(),
            e.updated_at.to_rfc3339())
}

fn run(cli: Cli) -> Result<(), CliError> {
    let url = cli.database_url.as_deref();
    match cli.command {
        Command::Key { job_class, unique_by } => {
            println!("{}", compute_key(&job_class, &unique_by)?);
        }
        Command::Show { key } => {
            let store = connect(url)?;
            let execution = load_by_key(&store, &key)?;
            let entries = store.entries(execution.id)?;
            if cli.json {
                print_json(&json!({ "execution": execution, "entries": entries }));
            } else {
                println!("{}", summary(&execution));
                for (name, step) in execution.definition.iter() {
                    println!("  step {name} -> {} {:?}", step.then, step.options.keys().collect::<Vec<_>>());
                }
                for e in &entries {
                    let data = e.data.as_ref().map(Value::to_string).unwrap_or_default();
                    println!("  #{:<6} {} {:<12} {:<24} {data}", e.seq, e.timestamp.to_rfc3339(), e.step, e.action);
                }
            }
        }
        Command::Context { key } => {
            let store = connect(url)?;
            let execution = load_by_key(&store, &key)?;
            let values = store.list_values(execution.id)?;
            if cli.json {
                let map: serde_json::Map<String, Value> = values.into_iter().map(|v| (v.key, v.value)).collect();
                print_json(&Value::Object(map));
            } else {
                for v in values {
                    println!("{} = {}", v.key, v.value);
                }
            }
        }
        Command::Recent { limit } => {
            let store = connect(url)?;
            let executions = store.recent_executions(limit)?;
            if cli.json {
                print_json(&json!(executions));
            } else {
                for e in &executions {
                    println!("{}", summary(e));
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    saga_persistence::init_dotenv();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[saga-cli] {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_for_equivalent_json() {
        let a = compute_key("Invoice", r#"{"customer": 5, "region": "eu"}"#).unwrap();
        let b = compute_key("Invoice", r#"{"region":"eu","customer":5}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn invalid_unique_by_is_a_usage_error() {
        let err = compute_key("Invoice", "{not json").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["saga-cli", "--json", "recent", "--limit", "5"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Recent { limit: 5 }));

        let cli = Cli::try_parse_from(["saga-cli", "show", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Show { ref key } if key == "abc"));
    }

    #[test]
    fn database_commands_need_a_url() {
        assert!(matches!(connect(None), Err(CliError::MissingDatabaseUrl)));
    }
}
