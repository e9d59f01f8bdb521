use async_trait::async_trait;
use meshgate::core::connector::ConnectorBuilder;
use meshgate::core::errors::GatewayError;
use meshgate::core::identity::{Identity, IdentitySlot, Role};
use meshgate::core::keypair_cache::KeyPairCache;
use meshgate::core::rotation::{RotationPhase, RotationState, RotationStateKind};
use meshgate::core::store::IdentityStore;
use meshgate::rpc::client::{AuthorityClient, WatchEventStream};
use meshgate::rpc::proto::{
    AppList, CertAuthority, Certs, DatabaseList, NodeList, PingResponse, ProxyList,
    RegisterRequest, ReRegisterRequest, WatchSpec,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

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

struct FakeClient;

#[async_trait]
impl AuthorityClient for FakeClient {
    async fn register(&self, request: RegisterRequest) -> Result<Certs, GatewayError> {
        Ok(Certs {
            ssh_cert: vec![1],
            x509_cert: vec![2],
            cluster_name: "prod".to_string(),
            principals: request.additional_principals,
            dns_names: request.dns_names,
            expiry_unix_secs: 1_900_000_000,
        })
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
        ca_type: &str,
        cluster_name: &str,
        _load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError> {
        Ok(CertAuthority {
            ca_type: ca_type.to_string(),
            cluster_name: cluster_name.to_string(),
            resource_id: 1,
            rotation: None,
            signing_cert: vec![],
        })
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
    async fn get_locks(&self, _in_force_only: bool) -> Result<meshgate::rpc::proto::LockList, GatewayError> {
        unimplemented!()
    }
    async fn new_watcher(&self, _spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        unimplemented!()
    }
}

fn builder() -> ConnectorBuilder {
    ConnectorBuilder {
        role: Role::Node,
        authority_addresses: Vec::new(),
        client_timeout: Duration::from_secs(1),
        ssh: None,
        token: Some("tok".to_string()),
        local_authority: Some(Arc::new(FakeClient)),
        additional_principals: vec!["extra".to_string()],
        dns_names: vec!["node.prod.internal".to_string()],
        host_uuid: "host-first-join".to_string(),
        node_name: "node-1".to_string(),
    }
}

fn identity(role: Role, suffix: &str) -> Identity {
    Identity {
        role,
        host_uuid: format!("host-{suffix}"),
        node_name: "node-1".into(),
        cluster_name: "prod".into(),
        private_key: vec![1],
        ssh_cert: vec![2],
        x509_cert: vec![3],
        principals: vec!["node-1".into()],
        dns_names: vec!["node-1.prod.internal".into()],
        expiry: 1_900_000_000,
    }
}

#[tokio::test]
async fn no_persisted_state_runs_first_time_connect() {
    let store = FakeStore::default();
    let keypairs = KeyPairCache::new();
    let connector = builder().connect(&store, &keypairs).await.unwrap();

    assert_eq!(connector.client_identity.cluster_name, "prod");
    assert_eq!(connector.client_identity.host_uuid, "host-first-join");
    assert_eq!(connector.client_identity.node_name, "node-1");
    assert!(store
        .read_identity(IdentitySlot::Current, Role::Node)
        .await
        .unwrap()
        .is_some());
    assert!(store.read_state(Role::Node).await.unwrap().is_some());
}

#[tokio::test]
async fn standby_state_builds_current_for_both_identities() {
    let store = FakeStore::default();
    let keypairs = KeyPairCache::new();
    let current = identity(Role::Node, "current");
    store
        .write_identity(IdentitySlot::Current, Role::Node, &current)
        .await
        .unwrap();
    store
        .write_state(Role::Node, &RotationState::standby())
        .await
        .unwrap();

    let connector = builder().connect(&store, &keypairs).await.unwrap();
    assert_eq!(connector.client_identity.host_uuid, "host-current");
    assert_eq!(connector.server_identity.host_uuid, "host-current");
}

#[tokio::test]
async fn update_clients_phase_uses_replacement_as_client_identity_only() {
    let store = FakeStore::default();
    let keypairs = KeyPairCache::new();
    let current = identity(Role::Node, "current");
    let replacement = identity(Role::Node, "replacement");
    store
        .write_identity(IdentitySlot::Current, Role::Node, &current)
        .await
        .unwrap();
    store
        .write_identity(IdentitySlot::Replacement, Role::Node, &replacement)
        .await
        .unwrap();
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateClients),
                current_id: "attempt-1".into(),
                started_at: 10,
                schedule: None,
            },
        )
        .await
        .unwrap();

    let connector = builder().connect(&store, &keypairs).await.unwrap();
    assert_eq!(connector.client_identity.host_uuid, "host-replacement");
    assert_eq!(connector.server_identity.host_uuid, "host-current");
}

#[tokio::test]
async fn update_servers_phase_uses_replacement_for_both_identities() {
    let store = FakeStore::default();
    let keypairs = KeyPairCache::new();
    let current = identity(Role::Node, "current");
    let replacement = identity(Role::Node, "replacement");
    store
        .write_identity(IdentitySlot::Current, Role::Node, &current)
        .await
        .unwrap();
    store
        .write_identity(IdentitySlot::Replacement, Role::Node, &replacement)
        .await
        .unwrap();
    store
        .write_state(
            Role::Node,
            &RotationState {
                state: RotationStateKind::InProgress,
                phase: Some(RotationPhase::UpdateServers),
                current_id: "attempt-1".into(),
                started_at: 10,
                schedule: None,
            },
        )
        .await
        .unwrap();

    let connector = builder().connect(&store, &keypairs).await.unwrap();
    assert_eq!(connector.client_identity.host_uuid, "host-replacement");
    assert_eq!(connector.server_identity.host_uuid, "host-replacement");
}
