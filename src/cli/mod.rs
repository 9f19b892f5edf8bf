//! # Command Line Interface
//!
//! Operator commands for secrets custody, signing, verification and field
//! encryption. Every subcommand shares the same bootstrap: `.env`, layered
//! configuration, then tracing and metrics.

pub mod fields;
pub mod output;
pub mod secrets;
pub mod signature;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::audit::AuditTrail;
use crate::clock::system_clock;
use crate::config::AppConfig;
use crate::observability::{init_observability, log_config_info};
use crate::secrets::{SecretString, SecretsManager, StoreConnection, MASTER_PASSPHRASE_ENV};
use crate::signature::SignerId;
use crate::storage::{create_pool, DbPool, SqlxAuditSink, SqlxSecretStore};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "custodia")]
#[command(about = "Secrets custody, field encryption and judicial signatures")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (overrides CUSTODIA_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Read the master passphrase from this file instead of CUSTODIA_MASTER_PASSPHRASE
    #[arg(long, global = true)]
    pub passphrase_file: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Secrets custody commands
    Secrets {
        #[command(subcommand)]
        command: secrets::SecretsCommands,
    },

    /// Sign a file with a signer's certificate
    Sign {
        #[arg(long)]
        signer: SignerId,

        #[arg(long)]
        file: PathBuf,

        /// Actor recorded in the audit log
        #[arg(long)]
        actor: Option<String>,
    },

    /// Verify a base64 signature over a file
    Verify {
        #[arg(long)]
        signer: SignerId,

        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        signature: String,
    },

    /// Print the SHA-256 of a file
    Hash {
        #[arg(long)]
        file: PathBuf,
    },

    /// Encrypt one field value into ENC: form
    EncryptField { value: String },

    /// Decrypt one ENC: field value
    DecryptField { value: String },
}

/// Shared state built once per invocation.
pub(crate) struct CliContext {
    pub config: AppConfig,
    pub pool: DbPool,
    pub audit: AuditTrail,
    pub output: OutputFormat,
    passphrase_file: Option<PathBuf>,
}

impl CliContext {
    async fn build(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
        if cli.verbose {
            config.observability.log_level = "debug".to_string();
        }

        init_observability(&config.observability)?;
        log_config_info(&config);

        let pool = create_pool(&config.database).await?;
        let audit = AuditTrail::new(Arc::new(SqlxAuditSink::new(pool.clone())), &config.audit);

        Ok(Self { config, pool, audit, output: cli.output, passphrase_file: cli.passphrase_file.clone() })
    }

    /// Initialize a secrets manager over the shared pool. Fails on a missing or wrong passphrase.
    pub async fn secrets_manager(&self) -> anyhow::Result<SecretsManager> {
        let passphrase = read_passphrase(self.passphrase_file.as_deref())?;
        self.secrets_manager_with(passphrase).await
    }

    /// Like [`secrets_manager`](Self::secrets_manager), but `None` when no passphrase is configured.
    pub async fn optional_secrets_manager(&self) -> anyhow::Result<Option<SecretsManager>> {
        match try_read_passphrase(self.passphrase_file.as_deref())? {
            Some(passphrase) => Ok(Some(self.secrets_manager_with(passphrase).await?)),
            None => Ok(None),
        }
    }

    async fn secrets_manager_with(&self, passphrase: SecretString) -> anyhow::Result<SecretsManager> {
        let manager = SecretsManager::new(self.config.secrets.clone(), system_clock(), self.audit.clone());
        let store = Arc::new(SqlxSecretStore::new(self.pool.clone()));
        manager
            .initialize(passphrase, StoreConnection::Existing(store))
            .await
            .context("Secrets manager failed to initialize")?;
        Ok(manager)
    }
}

fn try_read_passphrase(file: Option<&Path>) -> anyhow::Result<Option<SecretString>> {
    if let Some(path) = file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read passphrase file {}", path.display()))?;
        return Ok(Some(SecretString::new(contents.trim_end_matches(['\r', '\n']))));
    }
    Ok(std::env::var(MASTER_PASSPHRASE_ENV).ok().map(SecretString::from))
}

fn read_passphrase(file: Option<&Path>) -> anyhow::Result<SecretString> {
    match try_read_passphrase(file)? {
        Some(passphrase) => Ok(passphrase),
        None => bail!("No master passphrase: set {} or pass --passphrase-file", MASTER_PASSPHRASE_ENV),
    }
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let ctx = CliContext::build(&cli).await?;
    info!(environment = %ctx.config.environment, "custodia started");

    match cli.command {
        Commands::Secrets { command } => secrets::handle_secrets_command(command, &ctx).await,
        Commands::Sign { signer, file, actor } => signature::handle_sign(&ctx, signer, &file, actor).await,
        Commands::Verify { signer, file, signature } => {
            signature::handle_verify(&ctx, signer, &file, &signature).await
        }
        Commands::Hash { file } => signature::handle_hash(&file).await,
        Commands::EncryptField { value } => fields::handle_encrypt(&ctx, &value).await,
        Commands::DecryptField { value } => fields::handle_decrypt(&ctx, &value).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_sign_command() {
        let cli = Cli::try_parse_from(["custodia", "sign", "--signer", "42", "--file", "decision.pdf"]).unwrap();
        match cli.command {
            Commands::Sign { signer, file, actor } => {
                assert_eq!(signer, SignerId::from(42));
                assert_eq!(file, PathBuf::from("decision.pdf"));
                assert!(actor.is_none());
            }
            _ => panic!("expected sign"),
        }
    }

    #[test]
    fn test_rejects_traversal_signer() {
        assert!(Cli::try_parse_from(["custodia", "sign", "--signer", "../x", "--file", "a"]).is_err());
    }

    #[test]
    fn test_passphrase_file_strips_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pass");
        std::fs::write(&path, "correct horse\n").unwrap();
        let passphrase = read_passphrase(Some(&path)).unwrap();
        assert_eq!(passphrase.expose_secret(), "correct horse");
    }
}
