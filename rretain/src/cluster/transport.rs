use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;

use super::message::{Message, MessageReply};
use super::WeakClusterView;
use crate::utils::NodeId;
use crate::{HashMap, Result};

/// Connection to one peer node.
#[async_trait]
pub trait PeerClient: Sync + Send {
    async fn send(&self, msg: Message) -> Result<MessageReply>;
}

pub type PeerClients = Arc<HashMap<NodeId, Arc<dyn PeerClient>>>;

/// In-process peer, calls straight into another node's cluster view.
///
/// The peer can be switched off or slowed down to model an unreachable or lagging node.
#[derive(Clone)]
pub struct LocalClient {
    target: WeakClusterView,
    available: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl LocalClient {
    #[inline]
    pub fn new(target: WeakClusterView) -> Self {
        Self { target, available: Arc::new(AtomicBool::new(true)), latency_ms: Arc::new(AtomicU64::new(0)) }
    }

    #[inline]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    #[inline]
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerClient for LocalClient {
    async fn send(&self, msg: Message) -> Result<MessageReply> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(anyhow!("peer unavailable"));
        }
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        match self.target.upgrade() {
            Some(view) => Ok(view.handle(msg).await),
            None => Err(anyhow!("peer is gone")),
        }
    }
}

/// Sends one message to every peer at once and collects all replies.
pub struct MessageBroadcaster {
    peers: PeerClients,
    msg: Message,
    timeout: Option<Duration>,
}

impl MessageBroadcaster {
    #[inline]
    pub fn new(peers: PeerClients, msg: Message, timeout: Option<Duration>) -> Self {
        Self { peers, msg, timeout }
    }

    /// Each peer's reply, an error for peers that failed or did not answer within the timeout.
    #[inline]
    pub async fn join_all(self) -> Vec<(NodeId, Result<MessageReply>)> {
        let timeout = self.timeout;
        let mut senders = Vec::with_capacity(self.peers.len());
        for (id, client) in self.peers.iter() {
            let msg = self.msg.clone();
            let fut = async move {
                let reply = match timeout {
                    Some(t) => match tokio::time::timeout(t, client.send(msg)).await {
                        Ok(reply) => reply,
                        Err(_) => Err(anyhow!("no reply within {:?}", t)),
                    },
                    None => client.send(msg).await,
                };
                (*id, reply)
            };
            senders.push(fut.boxed());
        }
        futures::future::join_all(senders).await
    }
}
