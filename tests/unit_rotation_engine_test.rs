use async_trait::async_trait;
use meshgate::core::errors::GatewayError;
use meshgate::core::identity::{Identity, IdentitySlot, Role};
use meshgate::core::keypair_cache::KeyPairCache;
use meshgate::core::rotation::{RotationPhase, RotationState, RotationStateKind};
use meshgate::core::rotation_engine::RotationEngine;
use meshgate::core::store::IdentityStore;
use meshgate::rpc::client::{AuthorityClient, WatchEventStream};
use meshgate::rpc::proto::{
    AppList, CertAuthority, Certs, DatabaseList, LockList, NodeList, PingResponse, ProxyList,
    RegisterRequest, ReRegisterRequest, WatchSpec,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct FakeStore {
    current: Mutex<HashMap<Role, Identity>>,
    replacement: Mutex<HashMap<Role, Identity>>,
    states: Mutex<HashMap<Role, RotationState>>,
}

impl FakeStore {
    fn slot_map(&self, slot: IdentitySlot) -> &Mutex<HashMap<Role, Identity>> {
        match slot {
            IdentitySlot::Current => &self.current,
            IdentitySlot::Replacement => &self.replacement,
        }
    }
}

#[async_trait]
impl IdentityStore for FakeStore {
    async fn read_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
    ) -> Result<Option<Identity>, GatewayError> {
        Ok(self.slot_map(slot).lock().get(&role).cloned())
    }
    async fn write_identity(
        &self,
        slot: IdentitySlot,
        role: Role,
        identity: &Identity,
    ) -> Result<(), GatewayError> {
        self.slot_map(slot).lock().insert(role, identity.clone());
        Ok(())
    }
    async fn read_state(&self, role: Role) -> Result<Option<RotationState>, GatewayError> {
        Ok(self.states.lock().get(&role).cloned())
    }
    async fn write_state(&self, role: Role, state: &RotationState) -> Result<(), GatewayError> {
        self.states.lock().insert(role, state.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeClient {
    re_register_calls: Mutex<Vec<ReRegisterRequest>>,
}

#[async_trait]
impl AuthorityClient for FakeClient {
    async fn register(&self, _request: RegisterRequest) -> Result<Certs, GatewayError> {
        unimplemented!()
    }
    async fn re_register(&self, request: ReRegisterRequest) -> Result<Certs, GatewayError> {
        self.re_register_calls.lock().push(request.clone());
        Ok(Certs {
            ssh_cert: vec![9],
            x509_cert: vec![9],
            cluster_name: "prod".to_string(),
            principals: request.additional_principals,
            dns_names: request.dns_names,
            expiry_unix_secs: 1_900_000_000,
        })
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
        unimplemented!()
    }
    async fn new_watcher(&self, _spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        unimplemented!()
    }
}

fn identity_covering(role: Role) -> Identity {
    Identity {
        role,
        host_uuid: "host".into(),
        node_name: "node".into(),
        cluster_name: "prod".into(),
        private_key: vec![1],
        ssh_cert: vec![2],
        x509_cert: vec![3],
        principals: vec!["node-1".into()],
        dns_names: vec!["node-1.prod.internal".into()],
        expiry: 1_900_000_000,
    }
}

fn engine() -> RotationEngine {
    RotationEngine::new(
        Role::Node,
        vec!["node-1".into()],
        vec!["node-1.prod.internal".into()],
    )
}

#[tokio::test]
async fn standby_to_standby_with_covering_identity_is_a_no_op() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);

    let outcome = engine()
        .sync(
            &store,
            &client,
            &keypairs,
            &identity,
            &RotationState::standby(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.needs_reload, false);
    assert!(client.re_register_calls.lock().is_empty());
}

#[tokio::test]
async fn standby_to_standby_with_missing_principal_triggers_reregister() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let mut identity = identity_covering(Role::Node);
    identity.principals.clear();

    let outcome = engine()
        .sync(
            &store,
            &client,
            &keypairs,
            &identity,
            &RotationState::standby(),
        )
        .await
        .unwrap();

    assert!(outcome.needs_reload);
    assert_eq!(client.re_register_calls.lock().len(), 1);
    assert!(!client.re_register_calls.lock()[0].use_old_trust_root);
}

#[tokio::test]
async fn remote_init_from_local_standby_is_legal_and_records_state() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    let remote = RotationState {
        state: RotationStateKind::InProgress,
        phase: Some(RotationPhase::Init),
        current_id: "attempt-1".into(),
        started_at: 50,
        schedule: None,
    };

    let outcome = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap();

    assert!(outcome.phase_changed);
    assert!(!outcome.needs_reload);
    let persisted = store.read_state(Role::Node).await.unwrap().unwrap();
    assert_eq!(persisted.current_id, "attempt-1");
}

#[tokio::test]
async fn remote_init_conflicting_with_a_different_in_progress_attempt_fails() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateClients),
                current_id: "attempt-0".into(),
                started_at: 1,
                schedule: None,
            },
        )
        .await
        .unwrap();
    let remote = RotationState {
        state: RotationStateKind::InProgress,
        phase: Some(RotationPhase::Init),
        current_id: "attempt-1".into(),
        started_at: 50,
        schedule: None,
    };

    let err = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CompareFailed { .. }));
}

#[tokio::test]
async fn update_clients_registers_a_replacement_identity() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::Init),
                current_id: "attempt-1".into(),
                started_at: 50,
                schedule: None,
            },
        )
        .await
        .unwrap();
    let remote = RotationState {
        state: RotationStateKind::InProgress,
        phase: Some(RotationPhase::UpdateClients),
        current_id: "attempt-1".into(),
        started_at: 50,
        schedule: None,
    };

    let outcome = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap();
    assert!(outcome.needs_reload);
    assert!(store
        .read_identity(IdentitySlot::Replacement, Role::Node)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn remote_standby_with_matching_current_id_completes_the_local_attempt() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateServers),
                current_id: "attempt-1".into(),
                started_at: 50,
                schedule: None,
            },
        )
        .await
        .unwrap();
    // The authority has already returned to standby, but still reports the
    // `current_id` of the attempt that just finished.
    let remote = RotationState {
        state: RotationStateKind::Standby,
        phase: None,
        current_id: "attempt-1".into(),
        started_at: 0,
        schedule: None,
    };

    let outcome = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap();
    assert!(outcome.phase_changed);
    let persisted = store.read_state(Role::Node).await.unwrap().unwrap();
    assert_eq!(persisted.state, RotationStateKind::Standby);
}

#[tokio::test]
async fn remote_standby_with_unrelated_current_id_is_a_compare_failure() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateServers),
                current_id: "attempt-1".into(),
                started_at: 50,
                schedule: None,
            },
        )
        .await
        .unwrap();
    let remote = RotationState {
        state: RotationStateKind::Standby,
        phase: None,
        current_id: "attempt-2".into(),
        started_at: 0,
        schedule: None,
    };

    let err = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CompareFailed { .. }));
}

#[tokio::test]
async fn rollback_reregisters_against_the_old_trust_root() {
    let store = FakeStore::default();
    let client = FakeClient::default();
    let keypairs = KeyPairCache::new();
    let identity = identity_covering(Role::Node);
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateClients),
                current_id: "attempt-1".into(),
                started_at: 50,
                schedule: None,
            },
        )
        .await
        .unwrap();
    let remote = RotationState {
        state: RotationStateKind::InProgress,
        phase: Some(RotationPhase::Rollback),
        current_id: "attempt-1".into(),
        started_at: 50,
        schedule: None,
    };

    let outcome = engine()
        .sync(&store, &client, &keypairs, &identity, &remote)
        .await
        .unwrap();
    assert!(outcome.needs_reload);
    assert!(client.re_register_calls.lock()[0].use_old_trust_root);
}
