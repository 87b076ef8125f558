//! StashKV - An Embedded, File-Backed Key-Value Store
//!
//! This is the command-line front end. Each invocation opens the store file,
//! runs one command, and flushes on exit.

use anyhow::{bail, Context};
use stashkv::{Lifecycle, Store, StoreConfig, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable holding the encryption passphrase
const KEY_ENV: &str = "STASHKV_ENCRYPTION_KEY";

/// A single CLI command
#[derive(Debug)]
enum Command {
    Set {
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    Keys,
    Clear,
}

/// CLI configuration
struct Config {
    /// Store file
    file: PathBuf,
    /// Gzip the file
    compress: bool,
    /// Write indented JSON
    pretty: bool,
    /// What to run
    command: Command,
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::parse(&args)
    }

    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut file = PathBuf::from(stashkv::DEFAULT_FILE);
        let mut compress = false;
        let mut pretty = false;
        let mut ttl = None;
        let mut positional = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--file" | "-f" => {
                    let Some(path) = args.get(i + 1) else {
                        bail!("--file requires a value");
                    };
                    file = PathBuf::from(path);
                    i += 2;
                }
                "--ttl" | "-t" => {
                    let Some(secs) = args.get(i + 1) else {
                        bail!("--ttl requires a value");
                    };
                    let secs: f64 = secs
                        .parse()
                        .with_context(|| format!("invalid ttl '{}'", secs))?;
                    ttl = Some(stashkv::storage::ttl_from_secs(secs)?);
                    i += 2;
                }
                "--compress" | "-c" => {
                    compress = true;
                    i += 1;
                }
                "--pretty" => {
                    pretty = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("StashKV version {}", stashkv::VERSION);
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => bail!("unknown argument: {}", flag),
                _ => {
                    positional.push(args[i].clone());
                    i += 1;
                }
            }
        }

        let command = match positional.as_slice() {
            [cmd, key, value] if cmd == "set" => Command::Set {
                key: key.clone(),
                value: parse_value(value),
                ttl,
            },
            [cmd, key] if cmd == "get" => Command::Get { key: key.clone() },
            [cmd, key] if cmd == "delete" || cmd == "del" => Command::Delete { key: key.clone() },
            [cmd] if cmd == "keys" => Command::Keys,
            [cmd] if cmd == "clear" => Command::Clear,
            [] => bail!("no command given (try --help)"),
            other => bail!("invalid command: {}", other.join(" ")),
        };

        if ttl.is_some() && !matches!(command, Command::Set { .. }) {
            bail!("--ttl only applies to set");
        }

        Ok(Config {
            file,
            compress,
            pretty,
            command,
        })
    }

    fn store_config(&self, lifecycle: Arc<Lifecycle>) -> StoreConfig {
        let mut config = StoreConfig::new(&self.file)
            .with_compression(self.compress)
            .with_pretty(self.pretty)
            .with_auto_save(false)
            .with_ttl_cleanup_interval(Duration::ZERO)
            .with_lifecycle(lifecycle);
        if let Ok(key) = std::env::var(KEY_ENV) {
            config = config.with_encryption_key(key);
        }
        config
    }
}

/// Values are JSON when they parse as JSON, plain strings otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_help() {
    println!(
        r#"
StashKV - An Embedded, File-Backed Key-Value Store

USAGE:
    stashkv [OPTIONS] <COMMAND>

COMMANDS:
    set <KEY> <VALUE>    Store a value (JSON, or a plain string)
    get <KEY>            Print a value
    delete <KEY>         Remove a key
    keys                 List live keys
    clear                Remove every key

OPTIONS:
    -f, --file <PATH>    Store file (default: {})
    -t, --ttl <SECS>     Expire the key after SECS seconds (set only)
    -c, --compress       Gzip the store file
        --pretty         Write indented JSON
    -v, --version        Print version information
    -h, --help           Print this help message

ENVIRONMENT:
    {}    Encrypt the store file with this passphrase
    RUST_LOG                  Log filter (default: warn)

EXAMPLES:
    stashkv set name Ariz
    stashkv set user '{{"id": 1}}'
    stashkv --ttl 60 set session abc123
    stashkv get user
"#,
        stashkv::DEFAULT_FILE,
        KEY_ENV
    );
}

fn run(store: &Store, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Set { key, value, ttl } => {
            store.set(key, value, ttl)?;
            println!("OK");
        }
        Command::Get { key } => match store.get(&key)? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(nil)"),
        },
        Command::Delete { key } => {
            let removed = store.delete(&key)?;
            println!("{}", if removed { "1" } else { "0" });
        }
        Command::Keys => {
            for key in store.keys() {
                println!("{}", key);
            }
        }
        Command::Clear => {
            let size = store.size();
            store.clear();
            println!("{}", size);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args()?;
    debug!(command = ?config.command, file = %config.file.display(), "Parsed arguments");

    let lifecycle = Arc::new(Lifecycle::new());
    let store = Store::open(config.store_config(Arc::clone(&lifecycle)))
        .with_context(|| format!("failed to open {}", config.file.display()))?;

    // Ctrl+C flushes through the shutdown hooks
    tokio::select! {
        result = async { run(&store, config.command) } => {
            result?;
            store.save_sync().context("failed to save store")?;
            store.close();
        }
        flushed = Arc::clone(&lifecycle).shutdown_on_ctrl_c() => {
            info!(hooks = flushed?, "Interrupted, store flushed");
        }
    }

    Ok(())
}
