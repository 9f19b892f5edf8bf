//! `custodia secrets ...`

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use super::output::{print_json, print_table_header, truncate, OutputFormat};
use super::CliContext;
use crate::secrets::{NewSecret, RequestOrigin, RotationHistoryEntry, SecretMetadata, SecretString, SecretType};

#[derive(Subcommand)]
pub enum SecretsCommands {
    /// Derive the master key and decrypt every active secret
    InitCheck,

    /// Create version 1 of a secret
    Create {
        name: String,

        /// JWT, HMAC, AES, PKI, API, SMTP or OTHER
        #[arg(long = "type")]
        secret_type: SecretType,

        #[command(flatten)]
        value: ValueArgs,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        actor: Option<String>,

        /// RFC 3339 timestamp after which the secret should be rotated
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },

    /// Replace the value of an active secret
    Rotate {
        name: String,

        #[command(flatten)]
        value: ValueArgs,

        #[arg(long)]
        reason: String,

        #[arg(long)]
        actor: String,

        #[arg(long)]
        origin_ip: Option<String>,
    },

    /// Show a secret's metadata
    Get {
        name: String,

        /// Also print the decrypted value
        #[arg(long)]
        reveal: bool,
    },

    /// List active secrets
    List,

    /// Show the rotation history of a secret
    History { name: String },

    /// Stop serving a secret
    Deactivate {
        name: String,

        #[arg(long)]
        actor: String,
    },
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct ValueArgs {
    /// Secret value (visible in shell history; prefer --value-file)
    #[arg(long)]
    value: Option<String>,

    /// Read the secret value from a file
    #[arg(long)]
    value_file: Option<PathBuf>,
}

impl ValueArgs {
    fn resolve(self) -> anyhow::Result<SecretString> {
        match (self.value, self.value_file) {
            (Some(value), _) => Ok(SecretString::from(value)),
            (None, Some(path)) => {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read value file {}", path.display()))?;
                Ok(SecretString::new(contents.trim_end_matches(['\r', '\n'])))
            }
            (None, None) => bail!("Provide --value or --value-file"),
        }
    }
}

pub(crate) async fn handle_secrets_command(command: SecretsCommands, ctx: &CliContext) -> anyhow::Result<()> {
    let manager = ctx.secrets_manager().await?;

    match command {
        SecretsCommands::InitCheck => {
            let secrets = manager.list_secrets().await?;
            println!("Secrets manager ready: {} active secret(s) decrypted", secrets.len());
        }

        SecretsCommands::Create { name, secret_type, value, description, actor, expires_at } => {
            let mut request = NewSecret::new(name, value.resolve()?, secret_type);
            request.description = description;
            request.actor = actor;
            request.expires_at = expires_at;
            let metadata = manager.create_secret(request).await?;
            print_metadata(&[metadata], ctx.output)?;
        }

        SecretsCommands::Rotate { name, value, reason, actor, origin_ip } => {
            let origin = RequestOrigin {
                origin_ip,
                user_agent: Some(format!("custodia-cli/{}", crate::VERSION)),
            };
            let outcome = manager.rotate_secret(&name, value.resolve()?, &reason, &actor, origin).await?;
            match ctx.output {
                OutputFormat::Json => print_json(&outcome.history)?,
                OutputFormat::Table => println!(
                    "Rotated '{}' from version {} to {}",
                    name, outcome.history.old_version, outcome.history.new_version
                ),
            }
        }

        SecretsCommands::Get { name, reveal } => {
            let Some(metadata) = manager.list_secrets().await?.into_iter().find(|m| m.name == name) else {
                bail!("Secret not found: {}", name);
            };
            print_metadata(std::slice::from_ref(&metadata), ctx.output)?;
            if reveal {
                let value = manager.get_required_secret(&name).await?;
                println!("{}", value.expose_secret());
            }
        }

        SecretsCommands::List => {
            let secrets = manager.list_secrets().await?;
            if secrets.is_empty() && ctx.output == OutputFormat::Table {
                println!("No active secrets");
            } else {
                print_metadata(&secrets, ctx.output)?;
            }
        }

        SecretsCommands::History { name } => {
            let history = manager.rotation_history(&name).await?;
            print_history(&history, ctx.output)?;
        }

        SecretsCommands::Deactivate { name, actor } => {
            manager.deactivate_secret(&name, &actor).await?;
            println!("Secret '{}' deactivated", name);
        }
    }

    manager.close().await;
    Ok(())
}

fn print_metadata(secrets: &[SecretMetadata], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&secrets);
    }

    print_table_header(&[("Name", 28), ("Type", 6), ("Version", 8), ("Rotated", 25), ("Description", 30)]);
    for secret in secrets {
        println!(
            "{:<28} {:<6} {:<8} {:<25} {:<30}",
            truncate(&secret.name, 28),
            secret.secret_type.as_str(),
            secret.version,
            secret.rotated_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string()),
            truncate(secret.description.as_deref().unwrap_or(""), 30),
        );
    }
    println!();
    Ok(())
}

fn print_history(history: &[RotationHistoryEntry], format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&history);
    }

    print_table_header(&[("Old", 4), ("New", 4), ("Actor", 20), ("Rotated at", 25), ("Reason", 30)]);
    for entry in history {
        println!(
            "{:<4} {:<4} {:<20} {:<25} {:<30}",
            entry.old_version,
            entry.new_version,
            truncate(&entry.actor, 20),
            entry.rotated_at.to_rfc3339(),
            truncate(&entry.reason, 30),
        );
    }
    println!();
    Ok(())
}
