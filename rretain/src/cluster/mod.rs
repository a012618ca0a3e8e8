//! Cluster-wide view over the entry stores of all nodes.
//!
//! Local mutations are appended to an outbound queue and broadcast to every
//! peer in batches; peers apply them with last-writer-wins on the message
//! version. Global reads ask every peer for its raw entries, bounded by a read
//! timeout, and merge them with the local ones. Peers that fail or answer too
//! late are left out and listed in [`ClusterRead::missing`].

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::store::EntryStore;
use crate::topic::{self, TopicName};
use crate::types::{ClusterRead, RetainedMessage};
use crate::utils::{Counter, NodeId};
use crate::HashMap;

#[cfg(feature = "grpc")]
pub mod grpc;
pub mod message;
pub mod transport;

pub use message::{Message, MessageReply};
pub use transport::{LocalClient, MessageBroadcaster, PeerClient, PeerClients};

//batches in flight to the peers at once
const MAX_INFLIGHT_BATCHES: isize = 500;

#[derive(Clone)]
pub struct ClusterView {
    inner: Arc<ClusterViewInner>,
}

#[derive(Clone)]
pub struct WeakClusterView {
    inner: Weak<ClusterViewInner>,
}

impl WeakClusterView {
    #[inline]
    pub fn upgrade(&self) -> Option<ClusterView> {
        self.inner.upgrade().map(|inner| ClusterView { inner })
    }
}

pub struct ClusterViewInner {
    node_id: NodeId,
    store: Arc<EntryStore>,
    peers: RwLock<PeerClients>,
    client_timeout: Duration,
    msg_tx: mpsc::Sender<RetainedMessage>,
    msg_queue_count: Arc<AtomicIsize>,
    mutations_sent: Counter,
    mutations_received: Counter,
}

impl std::ops::Deref for ClusterView {
    type Target = ClusterViewInner;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl ClusterView {
    pub fn new(store: Arc<EntryStore>, cfg: &crate::conf::Cluster) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel::<RetainedMessage>(cfg.queue_capacity.max(1));
        let inner = Arc::new(ClusterViewInner {
            node_id: store.node_id(),
            store,
            peers: RwLock::new(PeerClients::default()),
            client_timeout: cfg.client_timeout,
            msg_tx,
            msg_queue_count: Arc::new(AtomicIsize::new(0)),
            mutations_sent: Counter::new(),
            mutations_received: Counter::new(),
        });
        Self::serve(Arc::downgrade(&inner), msg_rx, cfg.batch_size.max(1));
        Self { inner }
    }

    //drains the outbound queue and broadcasts it in batches
    fn serve(weak: Weak<ClusterViewInner>, mut msg_rx: mpsc::Receiver<RetainedMessage>, batch_size: usize) {
        tokio::spawn(async move {
            let inflights = Arc::new(AtomicIsize::new(0));
            let mut merger_msgs = Vec::new();
            while let Some(msg) = msg_rx.recv().await {
                merger_msgs.push(msg);
                while merger_msgs.len() < batch_size {
                    match tokio::time::timeout(Duration::from_millis(0), msg_rx.recv()).await {
                        Ok(Some(msg)) => {
                            merger_msgs.push(msg);
                        }
                        _ => break,
                    }
                }

                let msgs = std::mem::take(&mut merger_msgs);
                let view = match weak.upgrade() {
                    Some(inner) => ClusterView { inner },
                    None => break,
                };
                view.msg_queue_count.fetch_sub(msgs.len() as isize, Ordering::SeqCst);
                let peers = view.peers();
                if peers.is_empty() {
                    continue;
                }
                log::debug!("{} broadcast {} mutations", view.node_id, msgs.len());

                inflights.fetch_add(1, Ordering::SeqCst);
                while inflights.load(Ordering::SeqCst) > MAX_INFLIGHT_BATCHES {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }

                let inflights = inflights.clone();
                tokio::spawn(async move {
                    let count = msgs.len() as isize;
                    let replys =
                        MessageBroadcaster::new(peers, Message::Mutations(msgs), Some(view.client_timeout))
                            .join_all()
                            .await;
                    for (id, reply) in replys {
                        match reply {
                            Ok(MessageReply::Success) => view.mutations_sent.incs(count),
                            Ok(MessageReply::Error(e)) => {
                                log::warn!("{} mutations rejected by node {}, {}", view.node_id, id, e)
                            }
                            Ok(reply) => log::warn!("{} unexpected reply from node {}, {:?}", view.node_id, id, reply),
                            Err(e) => log::warn!("{} send mutations to node {} failed, {:?}", view.node_id, id, e),
                        }
                    }
                    inflights.fetch_sub(1, Ordering::SeqCst);
                });
            }
            log::debug!("outbound queue closed");
        });
    }

    #[inline]
    pub fn downgrade(&self) -> WeakClusterView {
        WeakClusterView { inner: Arc::downgrade(&self.inner) }
    }

    #[inline]
    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    #[inline]
    pub fn peers(&self) -> PeerClients {
        self.peers.read().clone()
    }

    pub fn add_peer(&self, id: NodeId, client: Arc<dyn PeerClient>) {
        let mut peers = self.peers.write();
        let mut new_peers = peers.as_ref().clone();
        new_peers.insert(id, client);
        *peers = Arc::new(new_peers);
    }

    /// Queue local mutations for the peers. A full queue drops them, peers stay stale until the next write.
    pub fn publish(&self, msgs: Vec<RetainedMessage>) {
        for msg in msgs {
            self.msg_queue_count.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.msg_tx.try_send(msg) {
                self.msg_queue_count.fetch_sub(1, Ordering::SeqCst);
                log::warn!("{} outbound queue rejected mutation, {:?}", self.node_id, e.into_inner());
            }
        }
    }

    #[inline]
    pub fn queue_len(&self) -> isize {
        self.msg_queue_count.load(Ordering::SeqCst)
    }

    /// Answer a request from a peer.
    pub async fn handle(&self, msg: Message) -> MessageReply {
        match msg {
            Message::Mutations(msgs) => {
                let mut invalids = 0;
                for msg in msgs {
                    if let Err(e) = topic::validate(msg.topic()) {
                        log::warn!("{} mutation dropped, {}, {:?}", self.node_id, e, msg);
                        invalids += 1;
                        continue;
                    }
                    if self.store.merge(msg) {
                        self.mutations_received.inc();
                    }
                }
                if invalids > 0 {
                    MessageReply::Error(format!("{} mutations with invalid topics dropped", invalids))
                } else {
                    MessageReply::Success
                }
            }
            Message::GetRetain(topic) => MessageReply::Retain(self.store.entry(&topic)),
            Message::GetRetains => MessageReply::Retains(self.store.entries()),
        }
    }

    async fn broadcast(&self, msg: Message, timeout: Duration) -> Vec<(NodeId, crate::Result<MessageReply>)> {
        let peers = self.peers();
        if peers.is_empty() {
            return Vec::new();
        }
        MessageBroadcaster::new(peers, msg, Some(timeout)).join_all().await
    }

    /// Cluster-wide retained message of `topic`, newest version wins.
    pub async fn get(&self, topic: &TopicName, timeout: Duration) -> ClusterRead<Option<RetainedMessage>> {
        let mut winner = self.store.entry(topic);
        let mut missing = Vec::new();
        for (id, reply) in self.broadcast(Message::GetRetain(topic.clone()), timeout).await {
            match reply {
                Ok(MessageReply::Retain(Some(msg))) => {
                    if winner.as_ref().map(|w| msg.version() > w.version()).unwrap_or(true) {
                        winner = Some(msg);
                    }
                }
                Ok(MessageReply::Retain(None)) => {}
                Ok(reply) => {
                    log::warn!("{} GetRetain, unexpected reply from node {}, {:?}", self.node_id, id, reply);
                    missing.push(id);
                }
                Err(e) => {
                    log::warn!("{} GetRetain, node {} left out, {:?}", self.node_id, id, e);
                    missing.push(id);
                }
            }
        }
        ClusterRead::partial(winner.filter(|m| self.store.is_live(m)), missing)
    }

    /// Cluster-wide retained messages, newest version of each topic wins.
    pub async fn list(&self, timeout: Duration) -> ClusterRead<Vec<RetainedMessage>> {
        let mut merged: HashMap<TopicName, RetainedMessage> =
            self.store.entries().into_iter().map(|m| (m.topic().clone(), m)).collect();
        let mut missing = Vec::new();
        for (id, reply) in self.broadcast(Message::GetRetains, timeout).await {
            match reply {
                Ok(MessageReply::Retains(msgs)) => {
                    for msg in msgs {
                        match merged.get(msg.topic()) {
                            Some(m) if m.version() >= msg.version() => {}
                            _ => {
                                merged.insert(msg.topic().clone(), msg);
                            }
                        }
                    }
                }
                Ok(reply) => {
                    log::warn!("{} GetRetains, unexpected reply from node {}, {:?}", self.node_id, id, reply);
                    missing.push(id);
                }
                Err(e) => {
                    log::warn!("{} GetRetains, node {} left out, {:?}", self.node_id, id, e);
                    missing.push(id);
                }
            }
        }
        let msgs = merged.into_values().filter(|m| self.store.is_live(m)).collect();
        ClusterRead::partial(msgs, missing)
    }

    #[inline]
    pub async fn contains(&self, topic: &TopicName, timeout: Duration) -> ClusterRead<bool> {
        self.get(topic, timeout).await.map(|m| m.is_some())
    }

    #[inline]
    pub async fn size(&self, timeout: Duration) -> ClusterRead<usize> {
        self.list(timeout).await.map(|msgs| msgs.len())
    }

    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "peers": self.peers.read().len(),
            "queue_len": self.queue_len(),
            "mutations_sent": self.mutations_sent.count(),
            "mutations_received": self.mutations_received.count(),
        })
    }
}
