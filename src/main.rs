//! Cold Signer Vault CLI
//!
//! Command-line interface for the keystore, signing, monitoring and history.
//!
//! Passwords and private keys are read from environment variables (or a
//! `.env` file), never from positional arguments.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::signers::Signature;
use clap::{Args, Parser, Subcommand};
use cold_signer_vault::keystore::{create_backup, restore_backup};
use cold_signer_vault::tx::{
    HistoryStore, RpcLedger, TransactionMonitor, TransactionRecord, TransferDetails,
};
use cold_signer_vault::wallet::{
    batch_results_to_json, BatchSigner, LocalSigner, SigningSecret, TransactionValidator,
    UnsignedTransaction,
};
use cold_signer_vault::{persist, Error, Keystore, Result, RpcConfig, VaultConfig};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "vault")]
#[command(about = "Cold-storage signing vault")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage encrypted identities
    #[command(subcommand)]
    Keys(KeysCommand),

    /// Sign with a stored identity
    #[command(subcommand)]
    Sign(SignCommand),

    /// Verify a signed message against an address
    Verify {
        #[arg(long)]
        message: String,

        /// 65-byte signature, hex encoded
        #[arg(long)]
        signature: Bytes,

        #[arg(long)]
        address: Address,
    },

    /// Encrypted keystore backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Watch a transaction until it settles and record it in the history
    Watch {
        hash: B256,

        /// Chain to query (defaults to the configured chain)
        #[arg(long)]
        chain_id: Option<u64>,

        /// Sender address recorded in the history
        #[arg(long)]
        from: Address,

        #[arg(long)]
        to: Option<Address>,

        /// Value in wei
        #[arg(long, default_value = "0")]
        value: U256,
    },

    /// Query the transaction history
    #[command(subcommand)]
    History(HistoryCommand),

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a new identity
    Generate {
        name: String,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// Import an existing private key
    Import {
        name: String,
        /// Hex private key
        #[arg(long, env = "VAULT_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// List identities and their addresses
    List,

    /// Delete an identity
    Delete { name: String },

    /// Change an identity's password
    Passwd {
        name: String,
        #[command(flatten)]
        password: PasswordArg,
        #[arg(long, env = "VAULT_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
}

#[derive(Subcommand)]
enum SignCommand {
    /// Sign one transaction read from a JSON file
    Tx {
        name: String,
        #[arg(long)]
        tx: PathBuf,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// Sign an EIP-191 personal message
    Message {
        name: String,
        #[arg(long)]
        message: String,
        #[command(flatten)]
        password: PasswordArg,
    },

    /// Sign a JSON array of transactions concurrently
    Batch {
        name: String,
        #[arg(long)]
        input: PathBuf,
        /// Write results here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Worker limit (defaults to the configured limit)
        #[arg(long)]
        workers: Option<usize>,
        #[command(flatten)]
        password: PasswordArg,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Archive every identity
    Create {
        path: PathBuf,
        #[command(flatten)]
        password: BackupPasswordArg,
    },

    /// Restore identities from an archive, overwriting existing ones
    Restore {
        path: PathBuf,
        #[command(flatten)]
        password: BackupPasswordArg,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Show one transaction
    Show { hash: B256 },

    /// Transactions sent from or to an address
    Address { address: Address },

    /// Most recent transactions
    Recent {
        /// Maximum number of records (0 = all)
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Args)]
struct PasswordArg {
    /// Keystore password
    #[arg(long, env = "VAULT_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args)]
struct BackupPasswordArg {
    /// Backup archive password
    #[arg(long = "backup-password", env = "VAULT_BACKUP_PASSWORD", hide_env_values = true)]
    password: String,
}

impl PasswordArg {
    fn secret(self) -> SecretString {
        SecretString::from(self.password)
    }
}

impl BackupPasswordArg {
    fn secret(self) -> SecretString {
        SecretString::from(self.password)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config
    let config = match cli.config {
        Some(ref path) => VaultConfig::load(path)?,
        None => VaultConfig::default(),
    };

    match cli.command {
        Commands::Keys(command) => run_keys(command, &config)?,
        Commands::Sign(command) => run_sign(command, &config).await?,
        Commands::Verify {
            message,
            signature,
            address,
        } => run_verify(&message, &signature, address)?,
        Commands::Backup(command) => run_backup(command, &config)?,
        Commands::Watch {
            hash,
            chain_id,
            from,
            to,
            value,
        } => {
            let details = TransferDetails {
                from,
                to,
                value,
                ..TransferDetails::default()
            };
            run_watch(hash, chain_id.unwrap_or(config.default_chain_id), details, &config).await?
        }
        Commands::History(command) => run_history(command, &config).await?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn run_keys(command: KeysCommand, config: &VaultConfig) -> Result<()> {
    let keystore = Keystore::from_config(config)?;

    match command {
        KeysCommand::Generate { name, password } => {
            let secret = SigningSecret::generate();
            let record = keystore.create_identity(&name, &secret, &password.secret())?;
            println!("{} {}", name, record.address);
        }
        KeysCommand::Import {
            name,
            private_key,
            password,
        } => {
            let private_key = zeroize::Zeroizing::new(private_key);
            let secret = SigningSecret::from_hex(&private_key)?;
            let record = keystore.create_identity(&name, &secret, &password.secret())?;
            println!("{} {}", name, record.address);
        }
        KeysCommand::List => {
            for name in keystore.list()? {
                match keystore.load(&name) {
                    Ok(record) => println!("{} {}", name, record.address),
                    Err(e) => tracing::warn!(identity = %name, error = %e, "Unreadable record"),
                }
            }
        }
        KeysCommand::Delete { name } => {
            keystore.delete(&name)?;
            println!("Deleted {}", name);
        }
        KeysCommand::Passwd {
            name,
            password,
            new_password,
        } => {
            keystore.change_password(
                &name,
                &password.secret(),
                &SecretString::from(new_password),
            )?;
            println!("Password changed for {}", name);
        }
    }
    Ok(())
}

async fn run_sign(command: SignCommand, config: &VaultConfig) -> Result<()> {
    let keystore = Keystore::from_config(config)?;
    let validator = TransactionValidator::new(config.validation.clone());

    match command {
        SignCommand::Tx { name, tx, password } => {
            let tx = load_transactions(&tx, config.default_chain_id)?
                .into_iter()
                .next()
                .ok_or_else(|| Error::InvalidArgument("no transaction in file".to_string()))?;
            let mut secret = keystore.unlock(&name, &password.secret())?;
            let from = secret.identity()?;

            let signer = BatchSigner::new(Arc::new(LocalSigner), 1).with_validator(validator);
            let signed = signer.sign_single(&secret, &tx);
            secret.clear();
            let (digest, signature) = signed.map_err(|e| Error::Signing(e.to_string()))?;

            let output = serde_json::json!({
                "from": from,
                "digest": digest,
                "signature": alloy::hex::encode_prefixed(signature.as_bytes()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        SignCommand::Message {
            name,
            message,
            password,
        } => {
            let mut secret = keystore.unlock(&name, &password.secret())?;
            let signed = LocalSigner.sign_message(message.as_bytes(), &secret);
            let address = secret.identity();
            secret.clear();
            let (signature, address) = (signed?, address?);

            let output = serde_json::json!({
                "address": address,
                "message": message,
                "signature": alloy::hex::encode_prefixed(signature.as_bytes()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        SignCommand::Batch {
            name,
            input,
            output,
            workers,
            password,
        } => {
            let requests = load_transactions(&input, config.default_chain_id)?;
            let secret = keystore.unlock(&name, &password.secret())?;
            let workers = workers.unwrap_or_else(|| config.batch.worker_limit());

            tracing::info!(identity = %name, requests = requests.len(), workers, "Signing batch");
            let signer = BatchSigner::new(Arc::new(LocalSigner), workers).with_validator(validator);
            let results = signer.sign_batch(secret, requests).await;
            let json = batch_results_to_json(&results)?;

            match output {
                Some(path) => {
                    persist::write_atomic(&path, json.as_bytes())?;
                    let failed = results.iter().filter(|r| !r.is_ok()).count();
                    println!(
                        "Signed {}/{} transactions -> {}",
                        results.len() - failed,
                        results.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
    }
    Ok(())
}

/// Read a transaction or an array of transactions, filling in a missing chain id
fn load_transactions(path: &Path, default_chain_id: u64) -> Result<Vec<UnsignedTransaction>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let mut items = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    for item in &mut items {
        if let Some(obj) = item.as_object_mut() {
            obj.entry("chainId")
                .or_insert_with(|| serde_json::json!(default_chain_id));
        }
    }
    Ok(serde_json::from_value(serde_json::Value::Array(items))?)
}

fn run_verify(message: &str, signature: &Bytes, address: Address) -> Result<()> {
    let signature = Signature::try_from(&signature[..])
        .map_err(|e| Error::InvalidArgument(format!("signature: {}", e)))?;
    if LocalSigner.verify_message(message.as_bytes(), &signature, address)? {
        println!("Signature VALID for {}", address);
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "signature was not produced by {}",
            address
        )))
    }
}

fn run_backup(command: BackupCommand, config: &VaultConfig) -> Result<()> {
    let keystore = Keystore::from_config(config)?;

    match command {
        BackupCommand::Create { path, password } => {
            let manifest = create_backup(&keystore, &path, &password.secret())?;
            println!(
                "Backed up {} identities to {}",
                manifest.included_identity_names.len(),
                path.display()
            );
        }
        BackupCommand::Restore { path, password } => {
            let manifest = restore_backup(&keystore, &path, &password.secret())?;
            println!(
                "Restored {} identities: {}",
                manifest.included_identity_names.len(),
                manifest.included_identity_names.join(", ")
            );
        }
    }
    Ok(())
}

async fn run_watch(
    hash: B256,
    chain_id: u64,
    details: TransferDetails,
    config: &VaultConfig,
) -> Result<()> {
    let rpc_config = RpcConfig::from_env();
    let ledger = RpcLedger::from_rpc_config(&rpc_config, chain_id)?;
    let history = HistoryStore::open(config.history_path.clone()).await?;
    let monitor = TransactionMonitor::new(Arc::new(ledger), &config.monitor);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    monitor
        .add_callback(hash, move |status| {
            let _ = tx.send(status.clone());
        })
        .await;
    monitor.monitor(hash).await?;
    tracing::info!(hash = %hash, chain_id, "Waiting for transaction to settle (Ctrl-C to stop)");

    tokio::select! {
        settled = rx.recv() => {
            let status = settled
                .ok_or_else(|| Error::Query("monitor stopped unexpectedly".to_string()))?;
            let record = TransactionRecord::from_status(&status, details)?;
            history.append(record.clone()).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        _ = tokio::signal::ctrl_c() => {
            monitor.cancel(hash).await?;
            let status = monitor.get_status(hash).await?;
            println!("Stopped watching {} (last state: {})", hash, status.state);
        }
    }

    monitor.shutdown().await;
    Ok(())
}

async fn run_history(command: HistoryCommand, config: &VaultConfig) -> Result<()> {
    let history = HistoryStore::open(config.history_path.clone()).await?;

    let records = match command {
        HistoryCommand::Show { hash } => vec![history.get(&hash).await?],
        HistoryCommand::Address { address } => history.query_by_address(address).await,
        HistoryCommand::Recent { limit } => history.recent(limit).await,
    };

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
