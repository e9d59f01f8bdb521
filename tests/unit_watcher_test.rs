use async_trait::async_trait;
use futures::stream;
use meshgate::core::errors::GatewayError;
use meshgate::core::retry::RetryConfig;
use meshgate::core::watch::{self, WatcherConfig, WatcherSpec};
use meshgate::rpc::client::{AuthorityClient, WatchEventStream};
use meshgate::rpc::proto::{
    AppList, CertAuthority, Certs, DatabaseList, EventType, LockList, NodeList, PingResponse,
    ProxyList, RegisterRequest, ReRegisterRequest, WatchEvent, WatchSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct FakeClient;

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
        unimplemented!()
    }
    async fn new_watcher(&self, _spec: WatchSpec) -> Result<WatchEventStream, GatewayError> {
        let events = vec![
            Ok(WatchEvent {
                r#type: EventType::Init as i32,
                kind: "fake".to_string(),
                name: String::new(),
                resource_id: 0,
                payload: vec![],
            }),
            Ok(WatchEvent {
                r#type: EventType::Put as i32,
                kind: "fake".to_string(),
                name: "one".to_string(),
                resource_id: 1,
                payload: vec![],
            }),
        ];
        // `pending()` keeps the stream open after the two real events so the
        // watch loop blocks on `shutdown` instead of cycling through retries.
        Ok(Box::pin(stream::iter(events).chain(stream::pending())))
    }
}

#[derive(Default)]
struct FakeSpec {
    fetch_calls: AtomicUsize,
    apply_calls: AtomicUsize,
}

#[async_trait]
impl WatcherSpec for FakeSpec {
    fn resource_kind(&self) -> &'static str {
        "fake"
    }
    async fn fetch_all(&self) -> Result<(), GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn apply_event(&self, _event: WatchEvent) {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn notify_stale(&self) {}
}

#[tokio::test]
async fn drives_fetch_all_after_init_then_applies_subsequent_events() {
    let spec = Arc::new(FakeSpec::default());
    let client: Arc<dyn AuthorityClient> = Arc::new(FakeClient);
    let config = WatcherConfig {
        retry: RetryConfig {
            first: Duration::from_millis(5),
            step: Duration::from_millis(5),
            max: Duration::from_millis(20),
        },
        refetch_period: Duration::from_secs(30),
        max_staleness: Duration::from_secs(0),
    };
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let spec_clone = spec.clone();
    let handle = tokio::spawn(async move {
        watch::run(spec_clone, client, WatchSpec { kinds: vec![] }, config, shutdown_rx).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    assert_eq!(spec.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(spec.apply_calls.load(Ordering::SeqCst), 1);
}
