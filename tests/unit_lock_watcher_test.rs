use async_trait::async_trait;
use meshgate::core::errors::GatewayError;
use meshgate::core::watch::lock::{LockCheckMode, LockWatcher};
use meshgate::core::watch::WatcherSpec;
use meshgate::rpc::client::{AuthorityClient, WatchEventStream};
use meshgate::rpc::proto::{
    AppList, CertAuthority, Certs, DatabaseList, EventType, GetCertAuthorityRequest, LockInfo,
    LockList, NodeList, PingResponse, ProxyList, RegisterRequest, ReRegisterRequest, WatchEvent,
    WatchSpec,
};
use std::sync::Arc;

struct FakeClient {
    locks: Vec<LockInfo>,
}

#[async_trait]
impl AuthorityClient for FakeClient {
    async fn register(&self, _request: RegisterRequest) -> Result<Certs, GatewayError> {
        unimplemented!()
    }
    async fn re_register(&self, _request: ReRegisterRequest) -> Result<Certs, GatewayError> {
        unimplemented!()
    }
    async fn ping(&self) -> Result<PingResponse, GatewayError> {
        unimplemented!()
    }
    async fn get_cluster_name(&self) -> Result<String, GatewayError> {
        unimplemented!()
    }
    async fn get_cert_authority(
        &self,
        _ca_type: &str,
        _cluster_name: &str,
        _load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError> {
        unimplemented!()
    }
    async fn get_proxies(&self) -> Result<ProxyList, GatewayError> {
        unimplemented!()
    }
    async fn get_nodes(&self, _namespace: &str) -> Result<NodeList, GatewayError> {
        unimplemented!()
    }
    async fn get_apps(&self) -> Result<AppList, GatewayError> {
        unimplemented!()
    }
    async fn get_databases(&self) -> Result<DatabaseList, GatewayError> {
        unimplemented!()
    }
    async fn get_locks(&self, _in_force_only: bool) -> Result<LockList, GatewayError> {
        Ok(LockList {
            locks: self.locks.clone(),
        })
    }
    async fn new_watcher(&self, _spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        unimplemented!()
    }
}

fn lock(name: &str, expires_unix_secs: i64) -> LockInfo {
    LockInfo {
        name: name.to_string(),
        targets: vec!["db-1".to_string()],
        expires_unix_secs,
    }
}

#[tokio::test]
async fn fetch_all_keeps_only_locks_currently_in_force() {
    let client = Arc::new(FakeClient {
        locks: vec![lock("active", 0), lock("expired", 1)],
    });
    let watcher = LockWatcher::new(client);
    watcher.fetch_all().await.unwrap();

    let found = watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &["db-1".to_string()])
        .unwrap();
    assert_eq!(found.unwrap().name, "active");
}

#[tokio::test]
async fn strict_mode_denies_when_view_is_stale() {
    let client = Arc::new(FakeClient { locks: vec![] });
    let watcher = LockWatcher::new(client);
    watcher.fetch_all().await.unwrap();
    watcher.notify_stale();

    let err = watcher
        .check_lock_in_force(LockCheckMode::Strict, &[])
        .unwrap_err();
    assert!(matches!(err, GatewayError::StaleView));

    // Best-effort tolerates the same staleness.
    assert!(watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &[])
        .is_ok());
}

#[tokio::test]
async fn apply_event_put_only_stores_in_force_locks() {
    let client = Arc::new(FakeClient { locks: vec![] });
    let watcher = LockWatcher::new(client);
    watcher.fetch_all().await.unwrap();

    watcher.apply_event(WatchEvent {
        r#type: EventType::Put as i32,
        kind: "lock".to_string(),
        name: "already-expired".to_string(),
        resource_id: 1,
        payload: encode(&lock("already-expired", 1)),
    })
    .await;
    assert!(watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &[])
        .unwrap()
        .is_none());

    watcher.apply_event(WatchEvent {
        r#type: EventType::Put as i32,
        kind: "lock".to_string(),
        name: "forever".to_string(),
        resource_id: 2,
        payload: encode(&lock("forever", 0)),
    })
    .await;
    let found = watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &[])
        .unwrap();
    assert_eq!(found.unwrap().name, "forever");
}

#[tokio::test]
async fn apply_event_delete_removes_the_lock() {
    let client = Arc::new(FakeClient {
        locks: vec![lock("forever", 0)],
    });
    let watcher = LockWatcher::new(client);
    watcher.fetch_all().await.unwrap();
    assert!(watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &[])
        .unwrap()
        .is_some());

    watcher.apply_event(WatchEvent {
        r#type: EventType::Delete as i32,
        kind: "lock".to_string(),
        name: "forever".to_string(),
        resource_id: 0,
        payload: vec![],
    })
    .await;
    assert!(watcher
        .check_lock_in_force(LockCheckMode::BestEffort, &[])
        .unwrap()
        .is_none());
}

fn encode(lock: &LockInfo) -> Vec<u8> {
    prost::Message::encode_to_vec(lock)
}
