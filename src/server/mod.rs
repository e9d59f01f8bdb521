// src/server/mod.rs

//! Wires the reconnect supervisor, rotation engine, and the resource
//! watchers a role needs into one running process (§5, §12). Grounded on
//! the teacher's `server::run` orchestration shape: build state, spawn
//! background tasks, then block until shutdown.

mod metrics_server;

use crate::config::Config;
use crate::core::connector::{Connector, ConnectorBuilder};
use crate::core::fanout::FanoutEvent;
use crate::core::identity::Role;
use crate::core::keypair_cache::KeyPairCache;
use crate::core::reconnect::ReconnectSupervisor;
use crate::core::retry::RetryConfig;
use crate::core::rotation::RotationState;
use crate::core::rotation_engine::{rotation_state_from_proto, RotationEngine};
use crate::core::store::{FileIdentityStore, IdentityStore};
use crate::core::watch::ca::CaWatcher;
use crate::core::watch::lock::LockWatcher;
use crate::core::watch::node::NodeWatcher;
use crate::core::watch::proxy::ProxyWatcher;
use crate::core::watch::{self as resource_watch, WatcherConfig};
use crate::rpc::client::AuthorityClient;
use crate::rpc::proto::{CertAuthority, WatchKindFilter, WatchSpec};
use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// Drives one role end to end: connects, keeps the connection alive,
/// tracks CA rotation, runs the watchers the role needs, and serves
/// `/metrics`, until `Ctrl-C` or an unrecoverable supervisor exit.
pub async fn run(
    config: Config,
    _log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    if config.role.is_local() {
        return Err(anyhow!(
            "role {} requires a co-hosted identity service, which is out of scope here (§1 non-goal: \"a full identity service\")",
            config.role
        ));
    }

    let store: Arc<dyn IdentityStore> = Arc::new(FileIdentityStore::new(config.data_dir.clone()));
    let ssh = config.ssh.as_ref().map(Into::into);

    let builder = ConnectorBuilder {
        role: config.role,
        authority_addresses: config.authority_addresses.clone(),
        client_timeout: config.client_timeout,
        ssh,
        token: config.token.clone(),
        local_authority: None,
        additional_principals: config.additional_principals.clone(),
        dns_names: config.dns_names.clone(),
        host_uuid: config.host_uuid.clone(),
        node_name: config.node_name.clone(),
    };

    let supervisor = Arc::new(ReconnectSupervisor {
        builder,
        store: store.clone(),
        keypairs: KeyPairCache::new(),
        retry: RetryConfig {
            max: config.max_retry_period,
            ..RetryConfig::default()
        },
        local_version: env!("CARGO_PKG_VERSION").to_string(),
        skip_version_check: config.skip_version_check,
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let (reload_tx, _) = broadcast::channel(8);
    let (connector_tx, mut connector_rx) = watch::channel(None::<Connector>);
    let (backoff_tx, mut backoff_rx) = mpsc::channel(16);

    let role_label = config.role.to_string();
    tokio::spawn({
        let role_label = role_label.clone();
        async move {
            while let Some(delay) = backoff_rx.recv().await {
                crate::core::metrics::set_reconnect_backoff(&role_label, delay);
            }
        }
    });

    let supervisor_shutdown = shutdown_tx.subscribe();
    let supervisor_reload = reload_tx.subscribe();
    let supervisor_task = tokio::spawn({
        let supervisor = supervisor.clone();
        async move {
            supervisor
                .run(supervisor_reload, connector_tx, Some(backoff_tx), supervisor_shutdown)
                .await
        }
    });

    // Kick off the first connect; every later reload goes through the same channel.
    let _ = reload_tx.send(());

    if connector_rx.changed().await.is_err() {
        return Err(anyhow!("reconnect supervisor exited before its first connect"));
    }
    let first_connector = connector_rx.borrow().clone();
    let Some(connector) = first_connector else {
        return Err(anyhow!("reconnect supervisor published an empty connector"));
    };
    let client = connector
        .client
        .clone()
        .ok_or_else(|| anyhow!("network role {} has no authority client", config.role))?;

    let ca_watcher = CaWatcher::new(client.clone(), config.cluster_name.clone());
    let watcher_config = WatcherConfig {
        retry: RetryConfig::default(),
        refetch_period: config.refetch_period,
        max_staleness: config.lock_max_staleness,
    };

    tokio::spawn(resource_watch::run(
        ca_watcher.clone(),
        client.clone(),
        WatchSpec {
            kinds: vec![WatchKindFilter {
                kind: "cert_authority".to_string(),
                sub_kind: String::new(),
                name: String::new(),
                filter: Default::default(),
            }],
        },
        watcher_config,
        shutdown_tx.subscribe(),
    ));

    let rotation_engine = Arc::new(RotationEngine::new(
        config.role,
        config.additional_principals.clone(),
        config.dns_names.clone(),
    ));
    tokio::spawn(run_rotation_loop(
        rotation_engine,
        store.clone(),
        Arc::new(KeyPairCache::new()),
        ca_watcher.clone(),
        connector_rx.clone(),
        config.cluster_name.clone(),
        config.rotation_connection_interval,
        reload_tx.clone(),
        shutdown_tx.subscribe(),
    ));

    spawn_role_watchers(&config, client.clone(), watcher_config, shutdown_tx.subscribe());

    if config.metrics.enabled {
        tokio::spawn(metrics_server::run_metrics_server(
            config.metrics.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    tokio::signal::ctrl_c().await.ok();
    info!(role = %config.role, "shutting down");
    let _ = shutdown_tx.send(());
    match supervisor_task.await {
        Ok(exit) => info!(role = %config.role, reason = %exit, "reconnect supervisor stopped"),
        Err(e) => error!(error = %e, "reconnect supervisor task panicked"),
    }
    Ok(())
}

/// Spawns the resource watchers relevant to `config.role` (§4.6, §5: "one
/// background task per watcher"). The lock watcher runs for every network
/// role since lock enforcement is cluster-wide; the others are scoped to
/// the roles that actually consult them.
fn spawn_role_watchers(
    config: &Config,
    client: Arc<dyn AuthorityClient>,
    watcher_config: WatcherConfig,
    shutdown: broadcast::Receiver<()>,
) {
    let lock_watcher = LockWatcher::new(client.clone());
    tokio::spawn(resource_watch::run(
        lock_watcher,
        client.clone(),
        kind_spec("lock"),
        watcher_config,
        shutdown.resubscribe(),
    ));

    match config.role {
        Role::Proxy => {
            let node_watcher = NodeWatcher::new(client.clone(), "");
            tokio::spawn(resource_watch::run(
                node_watcher,
                client.clone(),
                kind_spec("node"),
                watcher_config,
                shutdown.resubscribe(),
            ));
        }
        Role::Node => {
            let (proxy_watcher, _rx) = ProxyWatcher::new(client.clone());
            tokio::spawn(resource_watch::run(
                proxy_watcher,
                client.clone(),
                kind_spec("proxy"),
                watcher_config,
                shutdown.resubscribe(),
            ));
        }
        Role::App => {
            let (app_watcher, _rx) = crate::core::watch::app::AppWatcher::new(client.clone(), 16);
            tokio::spawn(resource_watch::run(
                app_watcher,
                client.clone(),
                kind_spec("app"),
                watcher_config,
                shutdown.resubscribe(),
            ));
        }
        Role::Database => {
            let (database_watcher, _rx) =
                crate::core::watch::database::DatabaseWatcher::new(client.clone(), 16);
            tokio::spawn(resource_watch::run(
                database_watcher,
                client.clone(),
                kind_spec("database"),
                watcher_config,
                shutdown.resubscribe(),
            ));
        }
        Role::Auth | Role::Admin => unreachable!("local roles are rejected before this point"),
    }
}

fn kind_spec(kind: &str) -> WatchSpec {
    WatchSpec {
        kinds: vec![WatchKindFilter {
            kind: kind.to_string(),
            sub_kind: String::new(),
            name: String::new(),
            filter: Default::default(),
        }],
    }
}

/// Drives the rotation engine (§4.7): one tick per CA fan-out event plus a
/// jittered periodic poll of the last-known CA, mirroring
/// `periodicSyncRotationState`'s `interval.New(HalfJitter(period))` shape
/// (§11).
#[allow(clippy::too_many_arguments)]
async fn run_rotation_loop(
    engine: Arc<RotationEngine>,
    store: Arc<dyn IdentityStore>,
    keypairs: Arc<KeyPairCache>,
    ca_watcher: Arc<CaWatcher>,
    connector_rx: watch::Receiver<Option<Connector>>,
    cluster_name: String,
    period: Duration,
    reload_tx: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ca_events = ca_watcher.fanout.subscribe();
    let mut ticker = tokio::time::interval_at(Instant::now() + half_jitter(period), period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            event = ca_events.recv() => match event {
                Some(FanoutEvent::Put(ca)) => {
                    process_rotation_event(&engine, &store, &keypairs, &connector_rx, &cluster_name, ca, &reload_tx).await;
                }
                Some(_) => {}
                None => return,
            },
            _ = ticker.tick() => {
                if let Some(ca) = ca_watcher.get_current("host", &cluster_name) {
                    process_rotation_event(&engine, &store, &keypairs, &connector_rx, &cluster_name, ca, &reload_tx).await;
                }
            }
        }
    }
}

async fn process_rotation_event(
    engine: &RotationEngine,
    store: &Arc<dyn IdentityStore>,
    keypairs: &Arc<KeyPairCache>,
    connector_rx: &watch::Receiver<Option<Connector>>,
    cluster_name: &str,
    ca: CertAuthority,
    reload_tx: &broadcast::Sender<()>,
) {
    if ca.ca_type != "host" || ca.cluster_name != cluster_name {
        return;
    }
    let Some(connector) = connector_rx.borrow().clone() else {
        return;
    };
    let Some(client) = connector.client.clone() else {
        return;
    };

    let remote: RotationState = match ca.rotation.map(rotation_state_from_proto).transpose() {
        Ok(state) => state.unwrap_or_else(RotationState::standby),
        Err(e) => {
            warn!(role = %engine.role(), error = %e, "failed to parse rotation info from authority");
            return;
        }
    };

    match engine
        .sync(
            store.as_ref(),
            client.as_ref(),
            keypairs,
            &connector.server_identity,
            &remote,
        )
        .await
    {
        Ok(outcome) => {
            crate::core::metrics::set_rotation_phase(&engine.role().to_string(), remote.state, remote.phase);
            if outcome.needs_reload {
                info!(role = %engine.role(), "rotation reload triggered, rebuilding connector");
                let _ = reload_tx.send(());
            }
        }
        Err(e) => {
            error!(role = %engine.role(), error = %e, "rotation sync failed");
        }
    }
}

/// `HalfJitter`: the first tick lands somewhere in `[period/2, period)` so
/// many nodes starting together don't all poll in lockstep (§11).
fn half_jitter(period: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.0);
    Duration::from_secs_f64(period.as_secs_f64() * factor)
}
