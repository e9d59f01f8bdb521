// src/rpc/client.rs

//! `AuthorityClient`: the query surface every non-local role uses to reach
//! the authority, and `NetworkAuthorityClient`, its gRPC implementation.
//! Shaped directly on `AuthorityAPI`/`NetworkAuthorityClient` in the sui
//! example (`authority_client.rs`): an async_trait query surface plus a
//! thin wrapper around a generated tonic client over a `Channel`.

use crate::core::errors::GatewayError;
use crate::rpc::proto::{
    authority_client::AuthorityClient as GeneratedClient, CertAuthority, Certs,
    GetCertAuthorityRequest, GetProxiesRequest, GetNodesRequest, GetAppsRequest,
    GetDatabasesRequest, GetLocksRequest, PingRequest, PingResponse, ProxyList, NodeList, AppList,
    DatabaseList, LockList, RegisterRequest, ReRegisterRequest, WatchEvent, WatchSpec,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tonic::transport::Channel;

pub type WatchEventStream = BoxStream<'static, Result<WatchEvent, GatewayError>>;

/// The authority query surface (§6). Implemented over the network
/// (`NetworkAuthorityClient`) and in-process (`rpc::local::LocalAuthorityClient`).
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn register(&self, request: RegisterRequest) -> Result<Certs, GatewayError>;

    async fn re_register(&self, request: ReRegisterRequest) -> Result<Certs, GatewayError>;

    async fn ping(&self) -> Result<PingResponse, GatewayError>;

    /// The cheap connectivity probe used to verify a freshly built client
    /// (§4.3 step 1, §11 `GetLocalClusterName`). Distinct from `ping`,
    /// which the reconnect supervisor uses afterward for the version gate.
    async fn get_cluster_name(&self) -> Result<String, GatewayError>;

    async fn get_cert_authority(
        &self,
        ca_type: &str,
        cluster_name: &str,
        load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError>;

    async fn get_proxies(&self) -> Result<ProxyList, GatewayError>;

    async fn get_nodes(&self, namespace: &str) -> Result<NodeList, GatewayError>;

    async fn get_apps(&self) -> Result<AppList, GatewayError>;

    async fn get_databases(&self) -> Result<DatabaseList, GatewayError>;

    async fn get_locks(&self, in_force_only: bool) -> Result<LockList, GatewayError>;

    async fn new_watcher(&self, spec: WatchSpec) -> Result<WatchEventStream, GatewayError>;
}

#[derive(Clone)]
pub struct NetworkAuthorityClient {
    inner: GeneratedClient<Channel>,
}

impl NetworkAuthorityClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: GeneratedClient::new(channel),
        }
    }

    fn client(&self) -> GeneratedClient<Channel> {
        self.inner.clone()
    }
}

#[async_trait]
impl AuthorityClient for NetworkAuthorityClient {
    async fn register(&self, request: RegisterRequest) -> Result<Certs, GatewayError> {
        self.client()
            .register(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn re_register(&self, request: ReRegisterRequest) -> Result<Certs, GatewayError> {
        self.client()
            .re_register(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn ping(&self) -> Result<PingResponse, GatewayError> {
        self.client()
            .ping(PingRequest {})
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_cluster_name(&self) -> Result<String, GatewayError> {
        self.ping().await.map(|resp| resp.cluster_name)
    }

    async fn get_cert_authority(
        &self,
        ca_type: &str,
        cluster_name: &str,
        load_private_key: bool,
    ) -> Result<CertAuthority, GatewayError> {
        self.client()
            .get_cert_authority(GetCertAuthorityRequest {
                ca_type: ca_type.to_string(),
                cluster_name: cluster_name.to_string(),
                load_private_key,
            })
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_proxies(&self) -> Result<ProxyList, GatewayError> {
        self.client()
            .get_proxies(GetProxiesRequest {})
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_nodes(&self, namespace: &str) -> Result<NodeList, GatewayError> {
        self.client()
            .get_nodes(GetNodesRequest {
                namespace: namespace.to_string(),
            })
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_apps(&self) -> Result<AppList, GatewayError> {
        self.client()
            .get_apps(GetAppsRequest {})
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_databases(&self) -> Result<DatabaseList, GatewayError> {
        self.client()
            .get_databases(GetDatabasesRequest {})
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn get_locks(&self, in_force_only: bool) -> Result<LockList, GatewayError> {
        self.client()
            .get_locks(GetLocksRequest { in_force_only })
            .await
            .map(tonic::Response::into_inner)
            .map_err(GatewayError::from)
    }

    async fn new_watcher(&self, spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        use futures::TryStreamExt;

        let stream = self
            .client()
            .new_watcher(spec)
            .await
            .map(tonic::Response::into_inner)?
            .map_err(GatewayError::from);
        Ok(Box::pin(stream))
    }
}
