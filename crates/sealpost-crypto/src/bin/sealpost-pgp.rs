//! sealpost-pgp: Command-line tool for the OpenPGP operations sealpost uses.
//!
//! Keys and messages are ASCII-armored files. Output is JSON so the tool can
//! be scripted.

use clap::{Parser, Subcommand};
use sealpost_core::{KeyAlgorithm, UserIdentity};
use sealpost_crypto::{KeyGenRequest, PgpEngine, RpgpEngine, UnlockedKey};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "sealpost-pgp")]
#[command(author, version, about = "OpenPGP key and message tool for sealpost")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair
    Keygen {
        /// Key algorithm (RSA or DSA)
        #[arg(short, long, default_value = "RSA")]
        algorithm: String,

        /// Key size in bits
        #[arg(short, long, default_value_t = sealpost_core::defaults::KEY_SIZE)]
        size: u32,

        /// Full name for the user id ("First Last")
        #[arg(short, long)]
        name: String,

        /// Email address for the user id
        #[arg(short, long)]
        email: String,

        /// Optional comment for the user id
        #[arg(short, long)]
        comment: Option<String>,

        /// Passphrase protecting the private key
        #[arg(short, long)]
        passphrase: String,

        /// Output directory for keys (default: current directory)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show fingerprint, algorithm and capabilities of a public key
    Inspect {
        /// Path to armored public key
        #[arg(short, long)]
        public_key: PathBuf,
    },

    /// Encrypt a file for a recipient, optionally signing it first
    Encrypt {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Recipient public key file
        #[arg(short, long)]
        recipient: PathBuf,

        /// Private key to sign with before encrypting
        #[arg(long, requires = "passphrase")]
        sign_key: Option<PathBuf>,

        /// Passphrase for the signing key
        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// Decrypt a file, optionally verifying the sender's signature
    Decrypt {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Path to your private key file
        #[arg(short, long)]
        key: PathBuf,

        /// Passphrase for the private key
        #[arg(short, long)]
        passphrase: String,

        /// Sender public key to verify against
        #[arg(long)]
        verify_key: Option<PathBuf>,
    },

    /// Sign a file
    Sign {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        key: PathBuf,

        #[arg(short, long)]
        passphrase: String,
    },

    /// Verify a signed file and write out its content
    Verify {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Signer public key file
        #[arg(short, long)]
        public_key: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let engine = RpgpEngine::new();

    match cli.command {
        Commands::Keygen {
            algorithm,
            size,
            name,
            email,
            comment,
            passphrase,
            output,
        } => {
            cmd_keygen(
                &engine,
                &algorithm,
                size,
                &name,
                &email,
                comment.as_deref(),
                passphrase,
                &output,
            )?;
        }
        Commands::Inspect { public_key } => {
            cmd_inspect(&engine, &public_key)?;
        }
        Commands::Encrypt {
            input,
            output,
            recipient,
            sign_key,
            passphrase,
        } => {
            let signer = match (sign_key, passphrase) {
                (Some(path), Some(pass)) => Some(load_unlocked(&path, &pass)?),
                _ => None,
            };
            cmd_encrypt(&engine, &input, &output, &recipient, signer.as_ref())?;
        }
        Commands::Decrypt {
            input,
            output,
            key,
            passphrase,
            verify_key,
        } => {
            let unlocked = load_unlocked(&key, &passphrase)?;
            cmd_decrypt(&engine, &input, &output, &unlocked, verify_key.as_deref())?;
        }
        Commands::Sign {
            input,
            output,
            key,
            passphrase,
        } => {
            let unlocked = load_unlocked(&key, &passphrase)?;
            cmd_sign(&engine, &input, &output, &unlocked)?;
        }
        Commands::Verify {
            input,
            output,
            public_key,
        } => {
            cmd_verify(&engine, &input, &output, &public_key)?;
        }
    }

    Ok(())
}

fn load_unlocked(path: &Path, passphrase: &str) -> Result<UnlockedKey, Box<dyn std::error::Error>> {
    let armored = std::fs::read_to_string(path)?;
    let label = path.file_name().map(|n| n.to_string_lossy().to_string());
    Ok(UnlockedKey::unchecked(
        label.as_deref().unwrap_or("private"),
        &armored,
        passphrase,
    ))
}

fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_keygen(
    engine: &RpgpEngine,
    algorithm: &str,
    size: u32,
    name: &str,
    email: &str,
    comment: Option<&str>,
    passphrase: String,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let algorithm: KeyAlgorithm = algorithm.parse()?;
    let (first_name, last_name) = split_name(name);
    let identity = UserIdentity {
        id: uuid::Uuid::nil(),
        email: email.to_string(),
        first_name,
        last_name,
    };

    let key = engine.new_key(&KeyGenRequest {
        algorithm,
        key_size: size,
        user_id: identity.pgp_user_id(comment),
        passphrase: Zeroizing::new(passphrase),
    })?;

    std::fs::create_dir_all(output_dir)?;
    let private_path = output_dir.join("private.asc");
    let public_path = output_dir.join("public.asc");
    std::fs::write(&private_path, &key.private_key)?;
    std::fs::write(&public_path, &key.public_key)?;

    let output = serde_json::json!({
        "key_id": key.key_id,
        "algorithm": key.algorithm,
        "key_size": key.key_size,
        "can_encrypt": key.capabilities.encrypt,
        "can_sign": key.capabilities.sign,
        "private_key_path": private_path.to_string_lossy(),
        "public_key_path": public_path.to_string_lossy(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_inspect(engine: &RpgpEngine, public_key_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let armored = std::fs::read_to_string(public_key_path)?;
    let info = engine.import_key(&armored)?;

    let output = serde_json::json!({
        "key_id": info.key_id,
        "algorithm": info.algorithm,
        "can_encrypt": info.capabilities.encrypt,
        "can_sign": info.capabilities.sign,
        "created_at": info.created_at.to_rfc3339(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_encrypt(
    engine: &RpgpEngine,
    input_path: &Path,
    output_path: &Path,
    recipient_path: &Path,
    signer: Option<&UnlockedKey>,
) -> Result<(), Box<dyn std::error::Error>> {
    let plaintext = std::fs::read_to_string(input_path)?;
    let recipient = std::fs::read_to_string(recipient_path)?;

    let ciphertext = match signer {
        Some(key) => engine.sign_then_encrypt(&plaintext, &recipient, key)?,
        None => engine.encrypt(&plaintext, &recipient)?,
    };
    std::fs::write(output_path, &ciphertext)?;

    let output = serde_json::json!({
        "success": true,
        "signed": signer.is_some(),
        "input_size": plaintext.len(),
        "output_size": ciphertext.len(),
        "output_path": output_path.to_string_lossy(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_decrypt(
    engine: &RpgpEngine,
    input_path: &Path,
    output_path: &Path,
    key: &UnlockedKey,
    verify_key: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ciphertext = std::fs::read_to_string(input_path)?;

    let plaintext = match verify_key {
        Some(path) => {
            let sender = std::fs::read_to_string(path)?;
            engine.decrypt_and_verify(&ciphertext, key, &sender)?
        }
        None => engine.decrypt(&ciphertext, key)?,
    };
    std::fs::write(output_path, &plaintext)?;

    let output = serde_json::json!({
        "success": true,
        "verified": verify_key.is_some(),
        "output_size": plaintext.len(),
        "output_path": output_path.to_string_lossy(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_sign(
    engine: &RpgpEngine,
    input_path: &Path,
    output_path: &Path,
    key: &UnlockedKey,
) -> Result<(), Box<dyn std::error::Error>> {
    let plaintext = std::fs::read_to_string(input_path)?;
    let signed = engine.sign(&plaintext, key)?;
    std::fs::write(output_path, &signed)?;

    let output = serde_json::json!({
        "success": true,
        "output_path": output_path.to_string_lossy(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn cmd_verify(
    engine: &RpgpEngine,
    input_path: &Path,
    output_path: &Path,
    public_key_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let signed = std::fs::read_to_string(input_path)?;
    let sender = std::fs::read_to_string(public_key_path)?;

    let content = engine.verify(&signed, &sender)?;
    std::fs::write(output_path, &content)?;

    let output = serde_json::json!({
        "valid": true,
        "output_path": output_path.to_string_lossy(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
