//! Patron CLI
//!
//! Command-line interface for Patron - library profiles, accounts and books.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use patron_core::{Config, Controller, ProfileId, ProfilesMode, StorageError};

mod commands;
mod output;
mod prompt;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "patron")]
#[command(about = "Patron - Borrow and read books from your libraries")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Profile to act on (multi-profile mode)
    #[arg(short, long, global = true)]
    profile: Option<ProfileId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show profiles, accounts and storage locations
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Manage library accounts of the current profile
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Manage books of an account
    Book {
        #[command(subcommand)]
        command: BookCommands,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, profiles_mode, providers_file, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List all profiles
    #[command(alias = "ls")]
    List,
    /// Create a new profile
    #[command(alias = "add")]
    Create {
        /// Display name, unique among profiles
        name: String,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        born: Option<String>,
        /// Provider of the first account (defaults to the default provider)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Show a profile and its preferences
    Show,
    /// Update reader preferences of a profile
    Prefs {
        /// Date of birth (YYYY-MM-DD, or "none")
        #[arg(long)]
        born: Option<String>,
        /// serif, sans_serif, open_dyslexic or monospace
        #[arg(long)]
        font: Option<String>,
        /// Font size in percent
        #[arg(long)]
        scale: Option<u16>,
        /// black_on_white, black_on_sepia or white_on_black
        #[arg(long)]
        scheme: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List accounts of the profile
    #[command(alias = "ls")]
    List,
    /// List known providers
    Providers,
    /// Add an account for a provider
    #[command(alias = "add")]
    Create {
        /// Provider URI
        provider: String,
    },
    /// Delete the account of a provider
    #[command(alias = "rm")]
    Delete {
        /// Provider URI
        provider: String,
    },
    /// Make the account of a provider current
    Select {
        /// Provider URI
        provider: String,
    },
    /// Log in to an account
    Login {
        /// Library card barcode
        barcode: String,
        /// PIN (prompted for when omitted)
        #[arg(long)]
        pin: Option<String>,
        /// Account id (defaults to the current account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Log out of the current account and delete its books
    Logout,
}

#[derive(Subcommand)]
enum BookCommands {
    /// List books of an account
    #[command(alias = "ls")]
    List {
        /// Account id (defaults to the current account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Borrow and download a book
    Borrow {
        /// Acquisition URI
        uri: String,
        /// Feed entry id (defaults to the URI)
        #[arg(long)]
        id: Option<String>,
        /// Title (defaults to the entry id)
        #[arg(long)]
        title: Option<String>,
        /// Declared content type of the acquisition
        #[arg(long)]
        content_type: Option<String>,
        /// Revocation URI
        #[arg(long)]
        revoke_uri: Option<String>,
        /// Account id (defaults to the current account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Return a book early
    Revoke {
        /// Book id (full or prefix)
        id: String,
        #[arg(long)]
        account: Option<String>,
    },
    /// Delete a book
    #[command(alias = "rm")]
    Delete {
        /// Book id (full or prefix)
        id: String,
        #[arg(long)]
        account: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the controller
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config);

    let controller = Controller::open(&config).inspect_err(print_storage_hint)?;
    select_profile(&controller, &config, cli.profile).await?;

    match cli.command {
        Commands::Config { .. } => unreachable!(), // Handled above
        Commands::Status => commands::status::show(&controller, &config, &output),
        Commands::Profile { command } => handle_profile_command(command, &controller, &output).await,
        Commands::Account { command } => handle_account_command(command, &controller, &output).await,
        Commands::Book { command } => handle_book_command(command, &controller, &output).await,
    }
}

async fn handle_profile_command(
    command: ProfileCommands,
    controller: &Controller,
    output: &Output,
) -> Result<()> {
    match command {
        ProfileCommands::List => commands::profile::list(controller, output),
        ProfileCommands::Create {
            name,
            born,
            provider,
        } => commands::profile::create(controller, name, born, provider, output).await,
        ProfileCommands::Show => commands::profile::show(controller, output),
        ProfileCommands::Prefs {
            born,
            font,
            scale,
            scheme,
        } => commands::profile::prefs(controller, born, font, scale, scheme, output).await,
    }
}

async fn handle_account_command(
    command: AccountCommands,
    controller: &Controller,
    output: &Output,
) -> Result<()> {
    match command {
        AccountCommands::List => commands::account::list(controller, output),
        AccountCommands::Providers => commands::account::providers(controller, output),
        AccountCommands::Create { provider } => {
            commands::account::create(controller, provider, output).await
        }
        AccountCommands::Delete { provider } => {
            commands::account::delete(controller, provider, output).await
        }
        AccountCommands::Select { provider } => {
            commands::account::select(controller, provider, output).await
        }
        AccountCommands::Login {
            barcode,
            pin,
            account,
        } => commands::account::login(controller, barcode, pin, account, output).await,
        AccountCommands::Logout => commands::account::logout(controller, output).await,
    }
}

async fn handle_book_command(
    command: BookCommands,
    controller: &Controller,
    output: &Output,
) -> Result<()> {
    match command {
        BookCommands::List { account } => commands::book::list(controller, account, output),
        BookCommands::Borrow {
            uri,
            id,
            title,
            content_type,
            revoke_uri,
            account,
        } => {
            let request = commands::book::BorrowArgs {
                uri,
                id,
                title,
                content_type,
                revoke_uri,
                account,
            };
            commands::book::borrow(controller, request, output).await
        }
        BookCommands::Revoke { id, account } => {
            commands::book::revoke(controller, id, account, output).await
        }
        BookCommands::Delete { id, account } => {
            commands::book::delete(controller, id, account, output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Suggest a fix when opening the data directory failed
fn print_storage_hint(error: &anyhow::Error) {
    let hint = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StorageError>())
        .and_then(StorageError::recovery_suggestion);
    if let Some(hint) = hint {
        eprintln!("Hint: {}", hint);
    }
}

/// Select the profile named by `--profile`
///
/// Multi-profile mode keeps no current profile between runs. When only one
/// profile exists it is selected without asking.
async fn select_profile(
    controller: &Controller,
    config: &Config,
    profile: Option<ProfileId>,
) -> Result<()> {
    if config.profiles_mode == ProfilesMode::Anonymous {
        if profile.is_some() {
            anyhow::bail!("--profile has no effect in anonymous mode");
        }
        return Ok(());
    }

    let id = match profile {
        Some(id) => id,
        None => {
            let ids: Vec<ProfileId> =
                controller.with_profiles(|p| p.profiles().keys().copied().collect());
            match ids.as_slice() {
                [only] => *only,
                _ => return Ok(()),
            }
        }
    };
    controller
        .profile_select(id)
        .await?
        .with_context(|| format!("Failed to select profile {}", id))
}

/// Initialize logging when `PATRON_LOG` is set
///
/// Logs go to the configured log file, or stderr.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("PATRON_LOG") else {
        return;
    };
    let env_filter = EnvFilter::new(format!(
        "patron_core={},patron_cli={}",
        log_level, log_level
    ));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match &config.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", path, e);
                    return;
                }
            };
            // Ignore error if already initialized
            let _ = builder.with_ansi(false).with_writer(file).try_init();
            info!("logging initialized to {:?}", path);
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
