use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;
mod cli;
mod error;
mod prompt;
mod session;
mod sso;
mod storage;

use storage::{ConfigStore, Settings, DEFAULT_LAST_USED_ACCOUNTS};

#[derive(Parser)]
#[command(
    name = "ssox",
    version,
    about = "Short-lived AWS credentials via AWS SSO"
)]
struct Cli {
    /// Directory holding config.toml and the token and usage caches
    #[arg(long, global = true, env = "SSOX_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// AWS shared credentials file to write
    #[arg(long, global = true, env = "AWS_SHARED_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    /// Number of recently used accounts offered per profile
    #[arg(long, global = true, env = "SSOX_LAST_USED_ACCOUNTS")]
    last_used: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose an account and role for profiles and write their credentials
    Select {
        /// Config name
        #[arg(default_value = "default")]
        config: String,
        /// Profiles to update ("all" for every profile; prompts if omitted)
        profiles: Vec<String>,
    },

    /// Renew credentials using previously chosen accounts (the default command)
    Refresh {
        /// Config name (prompts for configs if omitted)
        config: Option<String>,
        /// Profiles to update (prompts if omitted)
        profiles: Vec<String>,
    },

    /// Create or edit configs interactively
    Config(ConfigArgs),
}

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
struct ConfigArgs {
    #[command(subcommand)]
    action: Option<ConfigAction>,

    /// Configs to edit (default: "default")
    configs: Vec<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Merge configs from another config file
    Import {
        /// Path of the file to import
        path: String,
    },
    /// Copy the config file elsewhere
    Export {
        /// Destination path
        path: String,
    },
    /// Remove configs, or profiles of one config
    Remove {
        /// Configs to remove (default: "default")
        configs: Vec<String>,
        /// Remove only these profiles
        #[arg(short, long = "profile")]
        profiles: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    let result = settings(&cli).and_then(|settings| run(&cli, &settings));

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    match &cli.command {
        None => cli::commands::cmd_refresh(settings, None, &[]),
        Some(Commands::Select { config, profiles }) => {
            cli::commands::cmd_select(settings, config, profiles)
        }
        Some(Commands::Refresh { config, profiles }) => {
            cli::commands::cmd_refresh(settings, config.as_deref(), profiles)
        }
        Some(Commands::Config(args)) => match &args.action {
            None => cli::commands::cmd_config(settings, &args.configs),
            Some(ConfigAction::Import { path }) => cli::commands::cmd_config_import(settings, path),
            Some(ConfigAction::Export { path }) => cli::commands::cmd_config_export(settings, path),
            Some(ConfigAction::Remove { configs, profiles }) => {
                cli::commands::cmd_config_remove(settings, configs, profiles)
            }
        },
    }
}

fn settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::new(cli.config_dir.clone(), cli.credentials_file.clone())?;

    let from_config = ConfigStore::new(&settings)
        .load()
        .ok()
        .and_then(|file| file.last_used_accounts_count);
    let count = cli
        .last_used
        .or(from_config)
        .unwrap_or(DEFAULT_LAST_USED_ACCOUNTS);
    if count == 0 {
        anyhow::bail!("the number of last used accounts must be at least 1");
    }
    settings.last_used_accounts_count = count;
    Ok(settings)
}

fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
