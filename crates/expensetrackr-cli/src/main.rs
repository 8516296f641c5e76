//! ExpenseTrackr CLI - sign in, register and manage the stored session.
//!
//! The session token lives in the OS keychain (or an encrypted file) and is
//! shared with every other ExpenseTrackr client on this device.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use expensetrackr_core::api::{ApiClient, ApiError};
use expensetrackr_core::auth::{self, SessionStore, SESSION_KEY};
use expensetrackr_core::config::{Config, StorageBackend, ENV_STORAGE_PASSPHRASE};
use expensetrackr_core::route::Area;
use expensetrackr_core::validation::{LoginInput, RegisterInput};

#[derive(Parser)]
#[command(name = "expensetrackr", version, about = "Sign in to ExpenseTrackr and manage the device session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Session(SessionCommand),
    /// Show or update the saved configuration
    Config {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        device_name: Option<String>,
        #[arg(long)]
        storage: Option<StorageBackend>,
    },
}

/// Commands that need the secure store and the API client
#[derive(Subcommand)]
enum SessionCommand {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        /// Read the password from stdin instead of prompting
        #[arg(long)]
        password_stdin: bool,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Read password and confirmation (one per line) from stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Forget the stored session token
    Logout,
    /// Show whether this device is signed in
    Status,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();
    debug!("ExpenseTrackr CLI starting");

    let command = match cli.command {
        Command::Config {
            api_url,
            device_name,
            storage,
        } => return update_config(api_url, device_name, storage),
        Command::Session(command) => command,
    };

    let mut config = Config::load()?;
    if config.storage == StorageBackend::File && config.storage_passphrase.is_none() {
        let passphrase = rpassword::prompt_password("Secure store passphrase: ")
            .with_context(|| format!("Failed to read passphrase (or set {})", ENV_STORAGE_PASSPHRASE))?;
        config.storage_passphrase = Some(passphrase);
    }

    let storage = auth::open_storage(&config).await?;
    let session = Arc::new(SessionStore::open(storage, SESSION_KEY).await);
    let client = ApiClient::new(config.api_config(), Arc::clone(&session))?;

    let code = match command {
        SessionCommand::Login {
            email,
            password_stdin,
        } => {
            let password = read_secret("Password: ", password_stdin)?;
            let result = client.login(&LoginInput::new(email, password)).await;
            finish_sign_in(&session, result).await
        }
        SessionCommand::Register {
            name,
            email,
            password_stdin,
        } => {
            let password = read_secret("Password: ", password_stdin)?;
            let confirm = read_secret("Confirm password: ", password_stdin)?;
            let result = client
                .register(&RegisterInput::new(name, email, password, confirm))
                .await;
            finish_sign_in(&session, result).await
        }
        SessionCommand::Logout => {
            session.write(None).await;
            if session.state().token().is_some() {
                eprintln!("Could not remove the stored session. Please try again.");
                ExitCode::FAILURE
            } else {
                println!("Signed out.");
                ExitCode::SUCCESS
            }
        }
        SessionCommand::Status => {
            let area = Area::from_state(&session.state());
            println!("Session:  {}", area.label());
            println!("API:      {}", client.base_url());
            println!("Device:   {}", client.device_name());
            println!("Storage:  {}", config.storage);
            ExitCode::SUCCESS
        }
    };

    info!(area = ?Area::from_state(&session.state()), "ExpenseTrackr CLI done");
    Ok(code)
}

/// Persist a freshly issued token, or report why there is none
async fn finish_sign_in(session: &SessionStore, result: Result<String, ApiError>) -> ExitCode {
    match result {
        Ok(token) => {
            session.write(Some(token)).await;
            if Area::from_state(&session.state()) == Area::Authenticated {
                println!("Signed in.");
                ExitCode::SUCCESS
            } else {
                eprintln!("Signed in, but the session could not be saved on this device.");
                ExitCode::FAILURE
            }
        }
        Err(ApiError::InvalidInput { errors, .. }) => {
            for error in errors.iter() {
                eprintln!("{}: {}", error.field, error.message);
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            if let ApiError::Validation { fields, .. } = &err {
                for (field, message) in fields.first_per_field() {
                    debug!(field, message, "Server rejected field");
                }
            }
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

fn read_secret(prompt: &str, from_stdin: bool) -> Result<String> {
    if from_stdin {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    } else {
        rpassword::prompt_password(prompt).context("Failed to read password")
    }
}

fn update_config(
    api_url: Option<String>,
    device_name: Option<String>,
    storage: Option<StorageBackend>,
) -> Result<ExitCode> {
    let path = Config::config_path()?;
    let mut config = Config::load_from(&path)?;
    let changed = api_url.is_some() || device_name.is_some() || storage.is_some();

    if let Some(api_url) = api_url {
        config.api_url = api_url;
    }
    if let Some(device_name) = device_name {
        config.device_name = Some(device_name).filter(|name| !name.trim().is_empty());
    }
    if let Some(storage) = storage {
        config.storage = storage;
    }

    if changed {
        config.validate()?;
        config.save()?;
        println!("Saved {}", path.display());
    }

    println!("api_url:              {}", config.api_url);
    println!(
        "device_name:          {}",
        config.device_name.as_deref().unwrap_or("(generated)")
    );
    println!("storage:              {}", config.storage);
    println!("request_timeout_secs: {}", config.request_timeout_secs);
    Ok(ExitCode::SUCCESS)
}
