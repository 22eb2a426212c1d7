//! End-to-end scenarios against the public service API.
//!
//! Every collaborator is a mock, so these run without a network.

use hush_daemon::clock::ManualClock;
use hush_daemon::crypto::{ScopeKey, StretchParams};
use hush_daemon::keystore::MemoryKeystore;
use hush_daemon::relay::{MockRelayConnection, MockRelayConnector};
use hush_daemon::remote::{MockRemote, Scope};
use hush_daemon::storage::{ChannelStore, SqliteStore};
use hush_daemon::trust::MockTrustEngine;
use hush_daemon::{Config, Service, ServiceDeps, ServiceError};
use hush_types::{
    AuthMethod, ChannelId, IdentityId, RelayEvent, RelayOutput, ScopeKind, TrustRecord,
    TrustStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const NOW: u64 = 1_700_000_000;
const HOUR: u64 = 3600;

struct Daemon {
    service: Arc<Service>,
    store: Arc<SqliteStore>,
    remote: MockRemote,
    trust: MockTrustEngine,
    connector: MockRelayConnector,
}

fn daemon() -> Daemon {
    daemon_with(&Config::default())
}

fn daemon_with(config: &Config) -> Daemon {
    let store = Arc::new(SqliteStore::in_memory());
    let remote = MockRemote::new();
    let trust = MockTrustEngine::new();
    let connector = MockRelayConnector::new();
    let service = Arc::new(Service::new(
        config,
        ServiceDeps {
            keystore: Arc::new(MemoryKeystore::new(StretchParams::light())),
            store: store.clone(),
            trust: Arc::new(trust.clone()),
            remote: Arc::new(remote.clone()),
            connector: Arc::new(connector.clone()),
            clock: Arc::new(ManualClock::new(NOW)),
        },
    ));
    Daemon {
        service,
        store,
        remote,
        trust,
        connector,
    }
}

fn scope(kind: ScopeKind) -> Scope {
    Scope {
        id: IdentityId::random(),
        kind,
        key: ScopeKey::generate().unwrap(),
    }
}

async fn unlock(d: &Daemon, client: &str) -> String {
    d.service
        .unlock("password123", AuthMethod::Password, client)
        .await
        .unwrap()
}

async fn next(rx: &mut mpsc::Receiver<RelayOutput>) -> RelayOutput {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for relay output")
        .expect("relay stream ended")
}

// ===========================================
// Lifecycle
// ===========================================

#[tokio::test]
async fn setup_and_relock() {
    let d = daemon();
    d.service
        .setup("password123", AuthMethod::Password)
        .await
        .unwrap();

    let first = unlock(&d, "app").await;
    assert!(d.service.is_checking());

    d.service.lock().await.unwrap();
    assert!(!d.service.is_checking());
    assert!(d.service.authorize("Channels", Some(&first)).await.is_err());

    let second = unlock(&d, "app").await;
    assert!(d.service.is_checking());
    d.service.authorize("Channels", Some(&second)).await.unwrap();
}

#[tokio::test]
async fn lock_invalidates_every_client() {
    let d = daemon();
    let app = unlock(&d, "app").await;
    let cli = unlock(&d, "cli").await;
    d.service.authorize("Channels", Some(&app)).await.unwrap();
    d.service.authorize("Channels", Some(&cli)).await.unwrap();

    d.service.lock().await.unwrap();

    for token in [&app, &cli] {
        let err = d.service.authorize("Channels", Some(token)).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid token");
    }
    // Allow-listed methods still work while locked.
    d.service.authorize("AuthUnlock", None).await.unwrap();
}

#[tokio::test]
async fn wrong_secret_keeps_daemon_locked() {
    let d = daemon();
    unlock(&d, "app").await;
    d.service.lock().await.unwrap();

    let err = d
        .service
        .unlock("password124", AuthMethod::Password, "app")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCredential));
    assert!(!d.service.is_checking());
    assert!(matches!(d.service.channels(false).await, Err(ServiceError::Locked)));
}

#[tokio::test]
async fn lock_does_not_wait_on_stuck_trust_check() {
    let mut config = Config::default();
    config.trust.stop_timeout_ms = 100;
    let d = daemon_with(&config);
    d.trust.hang_identities();

    let token = unlock(&d, "app").await;
    for _ in 0..100 {
        if d.trust.identities_calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(d.trust.identities_calls(), 1);

    tokio::time::timeout(Duration::from_secs(5), d.service.lock())
        .await
        .expect("lock waited on the stuck check")
        .unwrap();
    assert!(!d.service.is_checking());
    assert!(d.service.authorize("Channels", Some(&token)).await.is_err());
    assert!(matches!(d.service.channels(false).await, Err(ServiceError::Locked)));
}

// ===========================================
// Trust staleness
// ===========================================

#[tokio::test]
async fn stale_failure_is_rechecked_fresh_success_is_not() {
    let d = daemon();
    let failed = IdentityId::random();
    let ok = IdentityId::random();
    d.trust.set_record(TrustRecord {
        identity: failed,
        status: TrustStatus::Failed,
        last_checked_at: NOW - 2 * HOUR,
        last_success_at: None,
    });
    d.trust.set_record(TrustRecord {
        identity: ok,
        status: TrustStatus::Ok,
        last_checked_at: NOW - 2 * HOUR,
        last_success_at: Some(NOW - 2 * HOUR),
    });

    unlock(&d, "app").await;
    let report = d.service.check_trust().await.unwrap();
    assert_eq!(report.checked, 2);

    let calls = d.trust.refresh_calls();
    assert!(calls.contains(&failed));
    assert!(!calls.contains(&ok));

    d.service.lock().await.unwrap();
}

// ===========================================
// Channel sync
// ===========================================

#[tokio::test]
async fn new_channel_is_resynced_then_pulled() {
    let d = daemon();
    unlock(&d, "app").await;
    let team = scope(ScopeKind::Team);
    d.service.import_scope(team.clone()).await.unwrap();

    let key = d.remote.add_channel(&team, "testing");
    let id = ChannelId::from_key(key.as_bytes());
    d.remote.push_messages(&id, &["m1", "m2", "m3", "m4", "m5"]);

    let channels = d.service.channels(true).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "testing");
    assert_eq!(channels[0].message_index, 5);
    assert_eq!(d.store.message_count(&id).await.unwrap(), 5);
}

#[tokio::test]
async fn pulling_twice_adds_nothing() {
    let d = daemon();
    unlock(&d, "app").await;
    let team = scope(ScopeKind::Team);
    d.service.import_scope(team.clone()).await.unwrap();
    let key = d.remote.add_channel(&team, "testing");
    let id = ChannelId::from_key(key.as_bytes());
    d.remote.push_messages(&id, &["m1", "m2"]);
    d.service.channels(true).await.unwrap();

    let report = d.service.reconciler().pull_messages(&id).await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.to, 2);
    let messages = d.service.messages(&id, true).await.unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn created_account_team_and_channel_survive_relock() {
    let d = daemon();
    d.service
        .create_account("password123", AuthMethod::Password, "app")
        .await
        .unwrap();
    d.service.create_team().await.unwrap();
    let id = d.service.create_channel("general", false).await.unwrap();
    d.service.send_message(&id, "hello", None).await.unwrap();

    d.service.lock().await.unwrap();
    unlock(&d, "app").await;

    let channels = d.service.channels(true).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].id, id);
    let messages = d.service.messages(&id, true).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hello");
}

// ===========================================
// Relay
// ===========================================

#[tokio::test]
async fn relay_keeps_per_channel_order() {
    let d = daemon();
    unlock(&d, "app").await;
    let user = scope(ScopeKind::User);
    d.service.import_scope(user.clone()).await.unwrap();

    let a = ChannelId::from_key(d.remote.add_channel(&user, "a").as_bytes());
    let b = ChannelId::from_key(d.remote.add_channel(&user, "b").as_bytes());
    d.service.channels(true).await.unwrap();
    d.remote.push_messages(&a, &["a1", "a2"]);
    d.remote.push_messages(&b, &["b1"]);

    let conn = MockRelayConnection::new();
    d.connector.queue_connection(conn.clone());

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = {
        let service = Arc::clone(&d.service);
        let cancel = cancel.clone();
        tokio::spawn(async move { service.relay(tx, cancel).await })
    };
    assert_eq!(next(&mut rx).await, RelayOutput::Connected);

    conn.push_events(vec![
        RelayEvent::Channel { channel: a, index: 1 },
        RelayEvent::Channel { channel: a, index: 2 },
        RelayEvent::Channel { channel: b, index: 1 },
    ]);
    assert_eq!(next(&mut rx).await, RelayOutput::Channel { channel: a });
    assert_eq!(next(&mut rx).await, RelayOutput::Channel { channel: a });
    assert_eq!(next(&mut rx).await, RelayOutput::Channel { channel: b });
    assert_eq!(d.store.message_count(&a).await.unwrap(), 2);
    assert_eq!(d.store.message_count(&b).await.unwrap(), 1);

    cancel.cancel();
    let result = task.await.unwrap();
    assert!(matches!(result, Err(ServiceError::Relay(_))));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn new_channel_reaches_running_relay() {
    let d = daemon();
    d.service
        .create_account("password123", AuthMethod::Password, "app")
        .await
        .unwrap();
    let conn = MockRelayConnection::new();
    d.connector.queue_connection(conn.clone());

    let (tx, mut rx) = mpsc::channel(16);
    let task = {
        let service = Arc::clone(&d.service);
        tokio::spawn(async move { service.relay(tx, CancellationToken::new()).await })
    };
    assert_eq!(next(&mut rx).await, RelayOutput::Connected);

    let id = d.service.create_channel("notes", true).await.unwrap();
    d.service.channels(true).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), conn.wait_for_sent(2))
        .await
        .unwrap();
    assert_eq!(conn.authorizations()[1], vec!["tok-notes"]);

    d.remote.push_messages(&id, &["n1"]);
    conn.push_events(vec![RelayEvent::Channel { channel: id, index: 1 }]);
    assert_eq!(next(&mut rx).await, RelayOutput::Channel { channel: id });
    assert_eq!(d.store.message_count(&id).await.unwrap(), 1);

    d.service.lock().await.unwrap();
    assert!(task.await.unwrap().is_err());
}
