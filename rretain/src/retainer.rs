use std::ops::Deref;
use std::sync::Arc;

use serde_json::json;

use crate::cluster::ClusterView;
use crate::conf::Settings;
use crate::limiter::Limiter;
use crate::router::Router;
use crate::service::RetainedMessageStore;
use crate::store::EntryStore;
use crate::task::Executor;
use crate::types::CallerId;
use crate::utils::NodeId;
use crate::Result;

/// One node of the retained message service.
///
/// Owns the entry store, the limiter, the worker pool and the cluster view;
/// every [`RetainedMessageStore`] handed out shares them.
#[derive(Clone)]
pub struct Retainer {
    inner: Arc<RetainerInner>,
}

pub struct RetainerInner {
    settings: Settings,
    store: Arc<EntryStore>,
    cluster: ClusterView,
    limiter: Limiter,
    exec: Executor,
    router: Router,
}

impl Deref for Retainer {
    type Target = RetainerInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Retainer {
    /// Must be called within a tokio runtime, background tasks are spawned.
    pub fn new(settings: Settings) -> Result<Self> {
        let store = Arc::new(EntryStore::new(settings.node.id, settings.store.clone()));
        let cluster = ClusterView::new(store.clone(), &settings.cluster);
        let limiter = Limiter::new(&settings.limiter)?;
        let exec = Executor::new(settings.task.exec_workers, settings.task.exec_queue_max);
        let router = Router::new(cluster.clone(), settings.cluster.read_timeout);
        Ok(Self { inner: Arc::new(RetainerInner { settings, store, cluster, limiter, exec, router }) })
    }

    /// Service handle for `caller`, admission is accounted per caller.
    #[inline]
    pub fn store<C: Into<CallerId>>(&self, caller: C) -> RetainedMessageStore {
        RetainedMessageStore::new(caller.into(), self.clone())
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.store.node_id()
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn entry_store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    #[inline]
    pub fn cluster(&self) -> &ClusterView {
        &self.cluster
    }

    #[inline]
    pub(crate) fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    #[inline]
    pub(crate) fn exec(&self) -> &Executor {
        &self.exec
    }

    #[inline]
    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    /// Periodically drop expired messages, old tombstones and idle limiter buckets.
    pub fn start_maintenance(&self) {
        let interval = self.settings.store.maintenance_interval;
        if interval.is_zero() {
            log::info!("maintenance disabled");
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let retainer = match weak.upgrade() {
                    Some(inner) => Retainer { inner },
                    None => break,
                };
                let now = std::time::Instant::now();
                let r = retainer.clone();
                let res = tokio::task::spawn_blocking(move || {
                    let expireds = r.store.remove_expired_messages();
                    let purgeds = r.store.purge_tombstones(r.settings.store.tombstone_ttl);
                    r.limiter.retain_recent();
                    (expireds, purgeds)
                })
                .await;
                match res {
                    Ok((expireds, purgeds)) => log::debug!(
                        "{} maintenance, expireds: {}, tombstones purged: {}, cost time: {:?}",
                        retainer.node_id(),
                        expireds,
                        purgeds,
                        now.elapsed()
                    ),
                    Err(e) => log::warn!("{} maintenance failed, {:?}", retainer.node_id(), e),
                }
            }
        });
    }

    /// Accept peer requests on `cluster.laddr`, if set.
    #[cfg(feature = "grpc")]
    pub async fn listen_and_serve(&self) -> Result<()> {
        if let Some(laddr) = self.settings.cluster.laddr {
            crate::cluster::grpc::GrpcServer::new(self.cluster.clone()).listen_and_serve(laddr, true, false).await?;
        }
        Ok(())
    }

    /// Register every configured peer. Connections are made on first use, a peer
    /// that is not up yet is listed as missing by global reads until it is.
    #[cfg(feature = "grpc")]
    pub async fn connect_peers(&self) -> Result<usize> {
        let cfg = &self.settings.cluster;
        let mut registereds = 0;
        for peer in cfg.peers.iter().filter(|p| p.id != self.node_id()) {
            let c = crate::cluster::grpc::GrpcClient::new(&peer.addr, cfg.client_timeout, cfg.client_concurrency_limit)
                .map_err(|e| anyhow::anyhow!("peer {:?}, {}", peer, e))?;
            self.cluster.add_peer(peer.id, Arc::new(c));
            registereds += 1;
            log::info!("{} registered peer {:?}", self.node_id(), peer);
        }
        Ok(registereds)
    }

    pub fn attrs(&self) -> serde_json::Value {
        json!({
            "node_id": self.node_id(),
            "store": self.store.stats(),
            "cluster": self.cluster.stats(),
            "limiter": {
                "enable": self.limiter.is_enable(),
                "keys": self.limiter.len(),
            },
            "exec": {
                "active_count": self.exec.active_count(),
                "waiting_count": self.exec.waiting_count(),
            },
            "config": self.settings.store.to_json().unwrap_or_default(),
        })
    }
}
