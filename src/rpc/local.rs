// src/rpc/local.rs

//! In-process local-authority adapter (§6, §9 design notes). `Auth`/`Admin`
//! roles never build a network client; this type satisfies the same
//! `AuthorityClient` query surface directly against an in-process
//! authority implementation, so the connector can treat both cases
//! uniformly. Shaped on `LocalAuthorityClient` in the sui example
//! (`authority_client.rs`), which does the analogous in-process
//! short-circuit for a validator co-located with its own authority state.

use crate::core::errors::GatewayError;
use crate::rpc::client::{AuthorityClient, WatchEventStream};
use crate::rpc::proto::{
    AppList, CertAuthority, Certs, DatabaseList, LockList, NodeList, PingResponse, ProxyList,
    RegisterRequest, ReRegisterRequest, WatchSpec,
};
use async_trait::async_trait;

/// The subset of the authority's own logic this adapter needs, kept
/// abstract: the authority implementation is out of the hard core (§1 —
/// "a full identity service" is a non-goal), only the contract the
/// connector consumes is in scope here.
#[async_trait]
pub trait LocalAuthority: Send + Sync {
    async fn register(&self, request: RegisterRequest) -> Result<Certs, GatewayError>;
    async fn re_register(&self, request: ReRegisterRequest) -> Result<Certs, GatewayError>;
    async fn cluster_name(&self) -> String;
    async fn server_version(&self) -> String;
    async fn cert_authority(
        &self,
        ca_type: &str,
        cluster_name: &str,
        load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError>;
    async fn proxies(&self) -> Result<ProxyList, GatewayError>;
    async fn nodes(&self, namespace: &str) -> Result<NodeList, GatewayError>;
    async fn apps(&self) -> Result<AppList, GatewayError>;
    async fn databases(&self) -> Result<DatabaseList, GatewayError>;
    async fn locks(&self, in_force_only: bool) -> Result<LockList, GatewayError>;
    async fn watch(&self, spec: WatchSpec) -> Result<WatchEventStream, GatewayError>;
}

pub struct LocalAuthorityClient<A: LocalAuthority> {
    authority: std::sync::Arc<A>,
}

impl<A: LocalAuthority> LocalAuthorityClient<A> {
    pub fn new(authority: std::sync::Arc<A>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl<A: LocalAuthority> AuthorityClient for LocalAuthorityClient<A> {
    async fn register(&self, request: RegisterRequest) -> Result<Certs, GatewayError> {
        self.authority.register(request).await
    }

    async fn re_register(&self, request: ReRegisterRequest) -> Result<Certs, GatewayError> {
        self.authority.re_register(request).await
    }

    async fn ping(&self) -> Result<PingResponse, GatewayError> {
        Ok(PingResponse {
            server_version: self.authority.server_version().await,
            server_features: Vec::new(),
            cluster_name: self.authority.cluster_name().await,
        })
    }

    async fn get_cluster_name(&self) -> Result<String, GatewayError> {
        Ok(self.authority.cluster_name().await)
    }

    async fn get_cert_authority(
        &self,
        ca_type: &str,
        cluster_name: &str,
        load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError> {
        self.authority
            .cert_authority(ca_type, cluster_name, load_private_key)
            .await
    }

    async fn get_proxies(&self) -> Result<ProxyList, GatewayError> {
        self.authority.proxies().await
    }

    async fn get_nodes(&self, namespace: &str) -> Result<NodeList, GatewayError> {
        self.authority.nodes(namespace).await
    }

    async fn get_apps(&self) -> Result<AppList, GatewayError> {
        self.authority.apps().await
    }

    async fn get_databases(&self) -> Result<DatabaseList, GatewayError> {
        self.authority.databases().await
    }

    async fn get_locks(&self, in_force_only: bool) -> Result<LockList, GatewayError> {
        self.authority.locks(in_force_only).await
    }

    async fn new_watcher(&self, spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        self.authority.watch(spec).await
    }
}
