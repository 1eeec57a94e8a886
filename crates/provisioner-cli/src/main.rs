//! Provisioner CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "provisioner")]
#[command(
    about = "Resolve placeholders and apply resource definitions in dependency order",
    long_about = None
)]
struct Cli {
    /// Engine settings file
    #[arg(
        long,
        global = true,
        env = "PROVISIONER_SETTINGS",
        default_value = "provisioner.kdl"
    )]
    settings: PathBuf,

    /// Config store file
    #[arg(long, global = true, env = "PROVISIONER_STORE", default_value = "store.json")]
    store: PathBuf,

    /// Config store scope label (overrides the settings file)
    #[arg(long, global = true, env = "PROVISIONER_LABEL")]
    label: Option<String>,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "PROVISIONER_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve definitions and reconcile them against the remote API
    Apply {
        /// Resource definition document
        definitions: PathBuf,
        /// Env override file
        #[arg(long, env = "PROVISIONER_ENV_FILE")]
        env_file: Option<PathBuf>,
        /// Derived settings to resolve and write back before applying
        #[arg(long)]
        derived: Option<PathBuf>,
        /// Remote endpoint (defaults to the value in the config store)
        #[arg(long, env = "PROVISIONER_ENDPOINT")]
        endpoint: Option<String>,
        /// Bearer token sent to the remote API
        #[arg(long, env = "PROVISIONER_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Maximum concurrent remote operations
        #[arg(long)]
        concurrency: Option<usize>,
        /// Log intended calls without touching the remote API
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a JSON file with every placeholder resolved
    Resolve {
        /// JSON file to resolve
        file: PathBuf,
        /// Env override file
        #[arg(long, env = "PROVISIONER_ENV_FILE")]
        env_file: Option<PathBuf>,
        /// Leave unresolvable placeholders in place
        #[arg(long)]
        lenient: bool,
    },
    /// Write deployment outputs into the config store
    Seed {
        /// Deployment outputs (`{"key": {"value": ...}}`)
        outputs: PathBuf,
        /// Uppercase keys before writing
        #[arg(long)]
        uppercase: bool,
    },
    /// Check a definition document without applying it
    Validate {
        /// Resource definition document
        definitions: PathBuf,
        /// Env override file
        #[arg(long, env = "PROVISIONER_ENV_FILE")]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if commands::is_configuration_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let global = commands::GlobalArgs {
        settings: cli.settings,
        store: cli.store,
        label: cli.label,
    };

    match cli.command {
        Commands::Apply {
            definitions,
            env_file,
            derived,
            endpoint,
            token,
            concurrency,
            dry_run,
        } => {
            commands::apply::run(
                &global,
                commands::apply::ApplyArgs {
                    definitions,
                    env_file,
                    derived,
                    endpoint,
                    token,
                    concurrency,
                    dry_run,
                },
            )
            .await
        }
        Commands::Resolve {
            file,
            env_file,
            lenient,
        } => commands::resolve::run(&global, &file, env_file.as_deref(), lenient).await,
        Commands::Seed { outputs, uppercase } => {
            commands::seed::run(&global, &outputs, uppercase).await
        }
        Commands::Validate {
            definitions,
            env_file,
        } => commands::validate::run(&global, &definitions, env_file.as_deref()).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
