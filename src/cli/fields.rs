//! `custodia encrypt-field` and `decrypt-field`.

use super::CliContext;
use crate::clock::system_clock;
use crate::encryption::{DataEncryptionService, KeyMaterialResolver};

async fn service(ctx: &CliContext) -> anyhow::Result<DataEncryptionService> {
    let manager = ctx.optional_secrets_manager().await?;
    let resolver =
        KeyMaterialResolver::new(ctx.config.encryption.clone(), ctx.config.environment).with_process_env();

    let service = DataEncryptionService::initialize(
        &resolver,
        manager.as_ref(),
        ctx.config.encryption.decrypt_failure_policy,
        ctx.audit.clone(),
        system_clock(),
    )
    .await?;

    if let Some(manager) = manager {
        manager.close().await;
    }
    Ok(service)
}

pub(crate) async fn handle_encrypt(ctx: &CliContext, value: &str) -> anyhow::Result<()> {
    let service = service(ctx).await?;
    match service.encrypt(Some(value))? {
        Some(sealed) => println!("{}", sealed),
        None => eprintln!("Empty input; nothing to encrypt"),
    }
    Ok(())
}

pub(crate) async fn handle_decrypt(ctx: &CliContext, value: &str) -> anyhow::Result<()> {
    let service = service(ctx).await?;
    if let Some(plaintext) = service.decrypt(Some(value)).await? {
        println!("{}", plaintext);
    }
    Ok(())
}
