//! sealpost: operator CLI for the secure-messaging pipeline over PostgreSQL.
//!
//! Users are addressed by email. Results are printed as JSON on stdout; logs
//! go to stderr (or `LOG_FILE`).
//!
//! Environment variables:
//!   DATABASE_URL          - PostgreSQL connection string
//!   SEALPOST_HMAC_SECRET  - integrity secret (required)
//!   SEALPOST_PASSPHRASE   - fallback for --passphrase
//!   SEALPOST_DB_*         - pool sizing (see sealpost_db::pool)
//!   LOG_FORMAT            - "json" or "text" (default: "text")
//!   LOG_FILE              - path to log file (optional, enables file logging)
//!   LOG_ANSI              - "true"/"false" override ANSI colors
//!   RUST_LOG              - standard env filter (default: "sealpost=info")

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use zeroize::Zeroizing;

use sealpost_core::defaults::{KEY_EXPIRE_DAYS, KEY_SIZE};
use sealpost_db::{log_pool_metrics, Database, PoolConfig, UserDirectory};
use sealpost_mail::{
    parse_recipients, ComposeRequest, GenerateKeyRequest, Outcome, SealConfig, SecureMail,
};

const ENV_PASSPHRASE: &str = "SEALPOST_PASSPHRASE";

#[derive(Parser)]
#[command(name = "sealpost")]
#[command(author, version, about = "Secure-messaging operator tool for sealpost")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Register a user
    AddUser {
        #[arg(short, long)]
        email: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,
    },

    /// Generate a key pair for a user
    Keygen {
        #[arg(short, long)]
        user: String,

        /// Key algorithm (RSA or DSA)
        #[arg(short, long, default_value = "RSA")]
        algorithm: String,

        /// Key size in bits
        #[arg(short, long, default_value_t = KEY_SIZE)]
        size: u32,

        /// Days until the key expires
        #[arg(long, default_value_t = KEY_EXPIRE_DAYS)]
        expire_days: i64,

        #[arg(short, long)]
        comment: Option<String>,

        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// List a user's keys, or show one with --key-id
    Keys {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        key_id: Option<String>,
    },

    /// Make one of a user's keys the default
    SetDefault {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        key_id: String,
    },

    /// Delete one of a user's keys
    DeleteKey {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        key_id: String,
    },

    /// Keep a public key received out of band
    ImportKey {
        #[arg(short, long)]
        user: String,

        /// Email of the key's owner
        #[arg(long)]
        peer: String,

        /// Armored public key file
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long, default_value_t = KEY_EXPIRE_DAYS)]
        expire_days: i64,
    },

    /// List a user's received keys, or delete one with --delete
    ReceivedKeys {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        delete: Option<String>,
    },

    /// Send a message
    Compose {
        #[arg(short, long)]
        user: String,

        /// Comma separated recipient emails
        #[arg(short, long)]
        to: String,

        #[arg(short, long, default_value = "")]
        subject: String,

        /// Message body; read from stdin when omitted
        #[arg(short, long)]
        body: Option<String>,

        #[arg(long)]
        encrypt: bool,

        #[arg(long)]
        sign: bool,

        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// Decrypt and verify a received message
    Decrypt {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        message_id: Uuid,

        #[arg(short, long)]
        passphrase: Option<String>,
    },
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sealpost=info,sealpost_mail=info,sealpost_db=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sealpost.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries results
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _file_guard = init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn passphrase(arg: Option<String>) -> Zeroizing<String> {
    Zeroizing::new(
        arg.or_else(|| std::env::var(ENV_PASSPHRASE).ok())
            .unwrap_or_default(),
    )
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a result, or the structured error and fail.
fn emit<T: Serialize>(outcome: Outcome<T>) -> anyhow::Result<()> {
    match outcome {
        Ok(value) => print_json(&value),
        Err(body) => {
            print_json(&serde_json::json!({ "error": body }))?;
            Err(anyhow!("{}", body.code))
        }
    }
}

async fn user_id(db: &Database, email: &str) -> anyhow::Result<Uuid> {
    db.find_user_by_email(email)
        .await?
        .map(|u| u.id)
        .ok_or_else(|| anyhow!("User with email {} does not exist", email))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SealConfig::from_env()?;
    let db = Arc::new(
        Database::connect_with_config(&config.database_url, PoolConfig::from_env()?)
            .await
            .context("Failed to connect to database")?,
    );
    log_pool_metrics(db.pool());

    if let Commands::Migrate = cli.command {
        db.migrate().await?;
        info!(subsystem = "database", op = "migrate", "Migrations applied");
        return print_json(&serde_json::json!({ "migrated": true }));
    }

    let mail = SecureMail::new(db.clone(), &config)?;

    match cli.command {
        Commands::Migrate => Ok(()),

        Commands::AddUser {
            email,
            first_name,
            last_name,
        } => {
            let user = db.users.create_user(&email, &first_name, &last_name).await?;
            print_json(&user)
        }

        Commands::Keygen {
            user,
            algorithm,
            size,
            expire_days,
            comment,
            passphrase: pass,
        } => {
            let id = user_id(&db, &user).await?;
            emit(
                mail.generate_key(
                    id,
                    GenerateKeyRequest {
                        algorithm,
                        key_size: size,
                        expire_days,
                        passphrase: passphrase(pass),
                        comment,
                    },
                )
                .await,
            )
        }

        Commands::Keys { user, key_id } => {
            let id = user_id(&db, &user).await?;
            match key_id {
                Some(key_id) => emit(mail.get_key(id, &key_id).await),
                None => emit(mail.list_keys(id).await),
            }
        }

        Commands::SetDefault { user, key_id } => {
            let id = user_id(&db, &user).await?;
            emit(mail.set_default_key(id, &key_id).await)
        }

        Commands::DeleteKey { user, key_id } => {
            let id = user_id(&db, &user).await?;
            emit(mail.delete_key(id, &key_id).await)
        }

        Commands::ImportKey {
            user,
            peer,
            file,
            expire_days,
        } => {
            let id = user_id(&db, &user).await?;
            let armored = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            emit(
                mail.import_received_key(id, &peer, &armored, expire_days)
                    .await,
            )
        }

        Commands::ReceivedKeys { user, delete } => {
            let id = user_id(&db, &user).await?;
            match delete {
                Some(key_id) => emit(mail.delete_received_key(id, &key_id).await),
                None => emit(mail.list_received_keys(id).await),
            }
        }

        Commands::Compose {
            user,
            to,
            subject,
            body,
            encrypt,
            sign,
            passphrase: pass,
        } => {
            let id = user_id(&db, &user).await?;
            let body = match body {
                Some(body) => body,
                None => std::io::read_to_string(std::io::stdin())?,
            };
            emit(
                mail.compose(
                    id,
                    ComposeRequest {
                        recipients: parse_recipients(&to),
                        subject,
                        body,
                        encrypt,
                        sign,
                        passphrase: passphrase(pass),
                    },
                )
                .await,
            )
        }

        Commands::Decrypt {
            user,
            message_id,
            passphrase: pass,
        } => {
            let id = user_id(&db, &user).await?;
            emit(mail.decrypt(id, message_id, &passphrase(pass)).await)
        }
    }
}
