//! `custodia sign`, `verify` and `hash`.

use std::path::Path;

use anyhow::Context;

use super::output::{print_json, OutputFormat};
use super::CliContext;
use crate::clock::system_clock;
use crate::crypto::sha256_hex;
use crate::signature::{SignatureService, SignerId, SigningContext, VerificationStatus};

fn service(ctx: &CliContext) -> SignatureService {
    SignatureService::new(ctx.config.pki.clone(), system_clock(), ctx.audit.clone())
}

async fn read_content(file: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(file).await.with_context(|| format!("Failed to read {}", file.display()))
}

pub(crate) async fn handle_sign(
    ctx: &CliContext,
    signer: SignerId,
    file: &Path,
    actor: Option<String>,
) -> anyhow::Result<()> {
    let content = read_content(file).await?;
    let context = SigningContext {
        actor_id: actor,
        origin_ip: None,
        user_agent: Some(format!("custodia-cli/{}", crate::VERSION)),
    };

    match service(ctx).sign(&signer, &content, &context).await {
        Ok(result) => {
            match ctx.output {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Table => {
                    println!("Signer:        {} ({})", result.certificate_common_name, result.signer_id);
                    println!("Serial:        {}", result.serial_number);
                    println!("Algorithm:     {}", result.algorithm);
                    println!("Content hash:  {}", result.content_hash);
                    println!("Verified:      {}", result.verified);
                    println!("Signature:     {}", result.signature_base64);
                }
            }
            Ok(())
        }
        Err(denied) => Err(denied.into()),
    }
}

pub(crate) async fn handle_verify(
    ctx: &CliContext,
    signer: SignerId,
    file: &Path,
    signature: &str,
) -> anyhow::Result<()> {
    let content = read_content(file).await?;
    let result = service(ctx).verify(&content, signature, &signer).await;

    match ctx.output {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("Status:        {}", result.status);
            println!("Content hash:  {}", result.content_hash);
            if let Some(cn) = &result.certificate_common_name {
                println!("Certificate:   {}", cn);
            }
            println!("Detail:        {}", result.detail);
        }
    }

    if result.status != VerificationStatus::Valid {
        std::process::exit(2);
    }
    Ok(())
}

pub(crate) async fn handle_hash(file: &Path) -> anyhow::Result<()> {
    let content = read_content(file).await?;
    println!("{}  {}", sha256_hex(&content), file.display());
    Ok(())
}
