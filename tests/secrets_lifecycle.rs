//! End-to-end custody of secrets over a real SQLite store.

mod common;

use std::sync::Arc;

use custodia::audit::{events, AuditTrail};
use custodia::clock::ManualClock;
use custodia::config::AuditConfig;
use custodia::secrets::{
    ManagerState, NewSecret, RequestOrigin, SecretType, SecretsError, SecretsManager, StoreConnection,
};
use custodia::storage::SqlxAuditSink;

use common::{audit_trail, fast_secrets_config, utc, TestDb};

const PASSPHRASE: &str = "correct horse battery staple";

fn manager_with(trail: AuditTrail) -> SecretsManager {
    let clock = Arc::new(ManualClock::new(utc(2030, 3, 1)));
    SecretsManager::new(fast_secrets_config(), clock, trail)
}

fn origin() -> RequestOrigin {
    RequestOrigin { origin_ip: Some("10.0.0.7".into()), user_agent: Some("custodia-cli".into()) }
}

#[tokio::test]
async fn scenario_a_create_get_rotate() {
    let db = TestDb::new();
    let (trail, audit) = audit_trail();
    let manager = manager_with(trail);
    manager.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();

    let created = manager
        .create_secret(NewSecret::new("JWT_SECRET", "s3cr3t", SecretType::Jwt).actor("admin@x"))
        .await
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(manager.get_secret("JWT_SECRET").await.unwrap().unwrap().expose_secret(), "s3cr3t");

    let outcome = manager
        .rotate_secret("JWT_SECRET", "s3cr3t-v2", "scheduled rotation", "admin@x", origin())
        .await
        .unwrap();
    assert_eq!(outcome.metadata.version, 2);
    assert_eq!(outcome.history.old_version, 1);
    assert_eq!(outcome.history.new_version, 2);
    assert_eq!(manager.get_secret("JWT_SECRET").await.unwrap().unwrap().expose_secret(), "s3cr3t-v2");

    let history = manager.rotation_history("JWT_SECRET").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "scheduled rotation");
    assert_eq!(history[0].actor, "admin@x");
    assert_eq!(history[0].origin_ip.as_deref(), Some("10.0.0.7"));

    let rotations = audit.entries_of(events::SECRET_ROTATE);
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].affected_data["success"], true);
    assert!(!rotations[0].affected_data.to_string().contains("s3cr3t"));

    manager.close().await;
    assert_eq!(manager.state().await, ManagerState::Closed);
}

#[tokio::test]
async fn restart_with_same_passphrase_recovers_values() {
    let db = TestDb::new();
    let first = manager_with(audit_trail().0);
    first.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();
    first.create_secret(NewSecret::new("SMTP_PASSWORD", "mail-pw", SecretType::Smtp)).await.unwrap();
    first.rotate_secret("SMTP_PASSWORD", "mail-pw-2", "provider reset", "ops", RequestOrigin::default()).await.unwrap();
    first.close().await;

    let second = manager_with(audit_trail().0);
    second.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();
    assert_eq!(second.get_secret("SMTP_PASSWORD").await.unwrap().unwrap().expose_secret(), "mail-pw-2");
    let listed = second.list_secrets().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].version, 2);
}

#[tokio::test]
async fn wrong_passphrase_is_fatal_and_leaves_manager_unready() {
    let db = TestDb::new();
    let first = manager_with(audit_trail().0);
    first.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();
    first.create_secret(NewSecret::new("HMAC_KEY", "k", SecretType::Hmac)).await.unwrap();
    first.close().await;

    let (trail, audit) = audit_trail();
    let second = manager_with(trail);
    let err = second
        .initialize("not the passphrase".into(), StoreConnection::Database(db.config.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, SecretsError::DecryptionFailed { ref key } if key == "HMAC_KEY"));
    assert!(err.is_fatal());
    assert_eq!(second.state().await, ManagerState::Uninitialized);
    assert!(matches!(second.get_secret("HMAC_KEY").await, Err(SecretsError::NotReady { .. })));

    let loads = audit.entries_of(events::SECRET_LOAD);
    assert_eq!(loads.len(), 1);
    assert_eq!(loads[0].affected_data["success"], false);
}

#[tokio::test]
async fn failed_history_insert_rolls_back_rotation() {
    let db = TestDb::new();
    let store = db.store().await;
    let (trail, audit) = audit_trail();
    let manager = manager_with(trail);
    manager.initialize(PASSPHRASE.into(), StoreConnection::Existing(store.clone())).await.unwrap();
    manager.create_secret(NewSecret::new("API_KEY", "v1", SecretType::Api)).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER fail_history BEFORE INSERT ON secret_rotation_history \
         BEGIN SELECT RAISE(ABORT, 'history unavailable'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let err = manager.rotate_secret("API_KEY", "v2", "compromised", "sec-team", origin()).await;
    assert!(err.is_err());

    assert_eq!(manager.get_secret("API_KEY").await.unwrap().unwrap().expose_secret(), "v1");
    manager.reload_secrets().await.unwrap();
    assert_eq!(manager.get_secret("API_KEY").await.unwrap().unwrap().expose_secret(), "v1");
    assert_eq!(manager.list_secrets().await.unwrap()[0].version, 1);
    assert!(manager.rotation_history("API_KEY").await.unwrap().is_empty());

    let rotations = audit.entries_of(events::SECRET_ROTATE);
    assert_eq!(rotations.len(), 1);
    assert_eq!(rotations[0].affected_data["success"], false);

    sqlx::query("DROP TRIGGER fail_history").execute(store.pool()).await.unwrap();
    let outcome = manager.rotate_secret("API_KEY", "v2", "compromised", "sec-team", origin()).await.unwrap();
    assert_eq!(outcome.history.new_version, 2);
}

#[tokio::test]
async fn readers_see_old_or_new_value_during_rotation() {
    let db = TestDb::new();
    let manager = Arc::new(manager_with(audit_trail().0));
    manager.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();
    manager.create_secret(NewSecret::new("AES_KEY", "value-1", SecretType::Aes)).await.unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let value = manager.get_secret("AES_KEY").await.unwrap().unwrap();
                    let value = value.expose_secret();
                    assert!(value.starts_with("value-"), "unexpected value {value}");
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for n in 2..=5 {
        manager
            .rotate_secret("AES_KEY", format!("value-{n}"), "load test", "ops", RequestOrigin::default())
            .await
            .unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(manager.get_secret("AES_KEY").await.unwrap().unwrap().expose_secret(), "value-5");
    assert_eq!(manager.rotation_history("AES_KEY").await.unwrap().len(), 4);
}

#[tokio::test]
async fn deactivated_secret_can_be_recreated() {
    let db = TestDb::new();
    let manager = manager_with(audit_trail().0);
    manager.initialize(PASSPHRASE.into(), StoreConnection::Database(db.config.clone())).await.unwrap();
    manager.create_secret(NewSecret::new("PKI_PIN", "1234", SecretType::Pki)).await.unwrap();

    let duplicate = manager.create_secret(NewSecret::new("PKI_PIN", "5678", SecretType::Pki)).await;
    assert!(matches!(duplicate, Err(SecretsError::AlreadyExists { .. })));

    manager.deactivate_secret("PKI_PIN", "ops").await.unwrap();
    assert!(manager.get_secret("PKI_PIN").await.unwrap().is_none());
    assert!(matches!(manager.get_required_secret("PKI_PIN").await, Err(SecretsError::NotFound { .. })));

    manager.create_secret(NewSecret::new("PKI_PIN", "5678", SecretType::Pki)).await.unwrap();
    assert_eq!(manager.get_secret("PKI_PIN").await.unwrap().unwrap().expose_secret(), "5678");
}

#[tokio::test]
async fn audit_entries_persist_to_the_audit_log_table() {
    let db = TestDb::new();
    let pool = db.pool().await;
    let sink = Arc::new(SqlxAuditSink::new(pool.clone()));
    let trail = AuditTrail::new(sink.clone(), &AuditConfig::default());
    let manager = manager_with(trail);
    manager
        .initialize(PASSPHRASE.into(), StoreConnection::Existing(Arc::new(custodia::storage::SqlxSecretStore::new(pool))))
        .await
        .unwrap();

    manager.create_secret(NewSecret::new("JWT_SECRET", "s3cr3t", SecretType::Jwt).actor("admin@x")).await.unwrap();

    let entries = sink.recent(Some(events::SECRET_CREATE), 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor_id.as_deref(), Some("admin@x"));
    assert_eq!(entries[0].affected_data["secret_name"], "JWT_SECRET");
    assert_eq!(entries[0].occurred_at, utc(2030, 3, 1));
}
