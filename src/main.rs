use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use mdsync::definition::load_definitions;
use mdsync::{EngineConfig, KeysByType, RunOptions, SyncEngine};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mdsync")]
#[command(about = "Retrieve and deploy platform metadata as local JSON files")]
struct Cli {
    /// Project file with tenant and connection settings
    #[arg(long, global = true, default_value = "mdsync.json")]
    config: PathBuf,

    /// JSON array of type definitions
    #[arg(long, global = true, default_value = "types.json")]
    types: PathBuf,

    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download entities of a type into the local tree
    Retrieve {
        type_name: String,
        #[arg(long = "key")]
        keys: Vec<String>,
        /// field=pattern, SQL LIKE syntax
        #[arg(long, value_parser = parse_like)]
        like: Vec<(String, String)>,
    },
    /// Create or update entities of a type and their dependencies
    Deploy {
        type_name: String,
        #[arg(long = "key")]
        keys: Vec<String>,
        #[arg(long)]
        no_update: bool,
        #[arg(long, conflicts_with = "change_key_value")]
        change_key_field: Option<String>,
        #[arg(long)]
        change_key_value: Option<String>,
        #[arg(long)]
        key_suffix: Option<String>,
        #[arg(long, value_parser = parse_like)]
        like: Vec<(String, String)>,
    },
    /// Print the dependency closure of type:key references
    Deps {
        #[arg(required = true)]
        refs: Vec<String>,
    },
    /// Delete entities remotely and locally
    Delete {
        type_name: String,
        #[arg(long = "key", required = true)]
        keys: Vec<String>,
    },
}

fn parse_like(raw: &str) -> std::result::Result<(String, String), String> {
    let (field, pattern) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid like '{raw}'. Expected format: field=pattern"))?;
    if field.trim().is_empty() {
        return Err(format!("invalid like '{raw}': field is empty"));
    }
    Ok((field.trim().to_string(), pattern.to_string()))
}

fn parse_ref(raw: &str) -> Result<(String, String)> {
    let (type_name, key) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid reference '{}'. Expected format: type:key", raw))?;
    if type_name.is_empty() || key.is_empty() {
        return Err(anyhow!("Invalid reference '{}'. Expected format: type:key", raw));
    }
    Ok((type_name.to_string(), key.to_string()))
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn keys_arg(keys: &[String]) -> Option<&[String]> {
    (!keys.is_empty()).then_some(keys)
}

fn options_with_like(options: RunOptions, like: &[(String, String)]) -> RunOptions {
    like.iter()
        .fold(options, |options, (field, pattern)| options.like(field, pattern))
}

async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load project config '{}'", cli.config.display()))?;
    let definitions = load_definitions(&cli.types)
        .with_context(|| format!("Failed to load type definitions '{}'", cli.types.display()))?;
    let engine = SyncEngine::connect(config, definitions)?;

    match cli.command {
        Command::Retrieve {
            type_name,
            keys,
            like,
        } => {
            let options = options_with_like(RunOptions::new(), &like);
            let mut engine = engine.with_options(options)?;
            let outcome = engine.retrieve(&type_name, keys_arg(&keys)).await?;
            println!("{outcome}");
        }
        Command::Deploy {
            type_name,
            keys,
            no_update,
            change_key_field,
            change_key_value,
            key_suffix,
            like,
        } => {
            let mut options = RunOptions::new().no_update(no_update);
            if let Some(field) = &change_key_field {
                options = options.change_key_field(field);
            }
            if let Some(value) = &change_key_value {
                options = options.change_key_value(value);
            }
            if let Some(suffix) = &key_suffix {
                options = options.key_suffix(suffix);
            }
            let options = options_with_like(options, &like);

            let mut engine = engine.with_options(options)?;
            let report = engine.deploy(&type_name, keys_arg(&keys)).await?;
            println!("{report}");
        }
        Command::Deps { refs } => {
            let mut seed = KeysByType::new();
            for raw in &refs {
                let (type_name, key) = parse_ref(raw)?;
                seed.entry(type_name).or_default().insert(key);
            }
            let closure = engine.deps(&seed).await?;
            println!("{}", serde_json::to_string_pretty(&closure)?);
        }
        Command::Delete { type_name, keys } => {
            let mut engine = engine;
            let outcome = engine.delete(&type_name, &keys).await?;
            println!("{outcome}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
