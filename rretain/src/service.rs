//! Non-blocking retained message service exposed to plugins.
//!
//! Every call validates its topic, takes a token from the caller's bucket and
//! returns a [`PendingResult`] right away; the work itself runs on the node's
//! worker pool. Rejections are delivered through the pending result as well.

use crate::error::RetainResult;
use crate::retainer::Retainer;
use crate::router::{Operation, Reply};
use crate::task::PendingResult;
use crate::topic;
use crate::types::{CallerId, ClusterRead, Payload, QoS, RetainedMessage};

pub trait AsyncRetainedMessageStore {
    /// Live retained messages stored on this node
    fn get_local_retained_messages(&self) -> PendingResult<Vec<RetainedMessage>>;

    fn local_size(&self) -> PendingResult<usize>;

    fn contains_locally(&self, topic: &str) -> PendingResult<bool>;

    /// Retained messages of the whole cluster, newest version of each topic
    fn get_retained_messages(&self) -> PendingResult<ClusterRead<Vec<RetainedMessage>>>;

    fn get_retained_message(&self, topic: &str) -> PendingResult<ClusterRead<Option<RetainedMessage>>>;

    /// Removing an unknown topic succeeds.
    fn remove(&self, topic: &str) -> PendingResult<()>;

    fn clear(&self) -> PendingResult<()>;

    /// An empty payload removes the topic.
    fn add_or_replace(&self, msg: RetainedMessage) -> PendingResult<()>;

    fn contains(&self, topic: &str) -> PendingResult<ClusterRead<bool>>;

    fn size(&self) -> PendingResult<ClusterRead<usize>>;
}

/// Service handle of one caller. Cheap to clone, all handles share the node.
#[derive(Clone)]
pub struct RetainedMessageStore {
    caller: CallerId,
    retainer: Retainer,
}

impl RetainedMessageStore {
    #[inline]
    pub(crate) fn new(caller: CallerId, retainer: Retainer) -> Self {
        Self { caller, retainer }
    }

    #[inline]
    pub fn caller(&self) -> &CallerId {
        &self.caller
    }

    /// Hook for the publish pipeline, a retained PUBLISH replaces the topic's
    /// retained message and one with an empty payload removes it.
    pub fn on_retained_publish<P: Into<Payload>>(&self, topic: &str, payload: P, qos: QoS) -> PendingResult<()> {
        match RetainedMessage::new(topic, payload, qos) {
            Ok(msg) => self.add_or_replace(msg),
            Err(e) => PendingResult::ready(Err(e)),
        }
    }

    fn call<T, F>(&self, op: Operation, f: F) -> PendingResult<T>
    where
        F: FnOnce(ClusterRead<Reply>) -> RetainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if let Err(e) = self.retainer.limiter().check(&self.caller, op.category()) {
            return PendingResult::ready(Err(e));
        }
        let router = self.retainer.router().clone();
        let caller = self.caller.clone();
        self.retainer.exec().submit(async move {
            let name = op.name();
            match router.dispatch(op).await {
                Ok(reply) => {
                    if !reply.is_complete() {
                        log::warn!("{} {} degraded, missing nodes {:?}", caller, name, reply.missing);
                    }
                    f(reply)
                }
                Err(e) => {
                    log::log!(e.log_level(), "{} {} failed, {}", caller, name, e);
                    Err(e)
                }
            }
        })
    }

    #[inline]
    fn call_with_topic<T, F, O>(&self, topic: &str, op: O, f: F) -> PendingResult<T>
    where
        O: FnOnce(topic::TopicName) -> Operation,
        F: FnOnce(ClusterRead<Reply>) -> RetainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match topic::topic_name(topic) {
            Ok(topic) => self.call(op(topic), f),
            Err(e) => PendingResult::ready(Err(e.into())),
        }
    }
}

impl AsyncRetainedMessageStore for RetainedMessageStore {
    fn get_local_retained_messages(&self) -> PendingResult<Vec<RetainedMessage>> {
        self.call(Operation::GetLocalRetainedMessages, |r| r.value.into_messages())
    }

    fn local_size(&self) -> PendingResult<usize> {
        self.call(Operation::LocalSize, |r| r.value.into_size())
    }

    fn contains_locally(&self, topic: &str) -> PendingResult<bool> {
        self.call_with_topic(topic, Operation::ContainsLocally, |r| r.value.into_bool())
    }

    fn get_retained_messages(&self) -> PendingResult<ClusterRead<Vec<RetainedMessage>>> {
        self.call(Operation::GetRetainedMessages, |r| r.try_map(Reply::into_messages))
    }

    fn get_retained_message(&self, topic: &str) -> PendingResult<ClusterRead<Option<RetainedMessage>>> {
        self.call_with_topic(topic, Operation::GetRetainedMessage, |r| r.try_map(Reply::into_message))
    }

    fn remove(&self, topic: &str) -> PendingResult<()> {
        self.call_with_topic(topic, Operation::Remove, |r| r.value.into_done())
    }

    fn clear(&self) -> PendingResult<()> {
        self.call(Operation::Clear, |r| r.value.into_done())
    }

    fn add_or_replace(&self, msg: RetainedMessage) -> PendingResult<()> {
        self.call(Operation::AddOrReplace(msg), |r| r.value.into_done())
    }

    fn contains(&self, topic: &str) -> PendingResult<ClusterRead<bool>> {
        self.call_with_topic(topic, Operation::Contains, |r| r.try_map(Reply::into_bool))
    }

    fn size(&self) -> PendingResult<ClusterRead<usize>> {
        self.call(Operation::Size, |r| r.try_map(Reply::into_size))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cluster::LocalClient;
    use crate::conf::{self, Rate, Settings};
    use crate::error::RetainError;

    fn settings(node_id: u64, f: impl FnOnce(&mut conf::Inner)) -> Settings {
        let mut inner = conf::Inner::default();
        inner.node.id = node_id;
        inner.task.exec_workers = 16;
        inner.cluster.read_timeout = Duration::from_millis(200);
        f(&mut inner);
        Settings::from(inner)
    }

    fn node(node_id: u64) -> Retainer {
        Retainer::new(settings(node_id, |_| {})).unwrap()
    }

    //every node sees every other node through an in-process client
    fn cluster(n: u64) -> (Vec<Retainer>, Vec<LocalClient>) {
        let nodes = (1..=n).map(node).collect::<Vec<_>>();
        let mut clients = Vec::new();
        for a in nodes.iter() {
            for b in nodes.iter() {
                if a.node_id() != b.node_id() {
                    let c = LocalClient::new(b.cluster().downgrade());
                    clients.push(c.clone());
                    a.cluster().add_peer(b.node_id(), Arc::new(c));
                }
            }
        }
        (nodes, clients)
    }

    fn msg(topic: &str, payload: &'static str) -> RetainedMessage {
        RetainedMessage::new(topic, payload, QoS::AtLeastOnce).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn add_then_read_locally() {
        let n = node(1);
        let s = n.store("p1");
        s.add_or_replace(msg("a/b", "hello")).await.unwrap();
        assert!(s.contains_locally("a/b").await.unwrap());
        assert_eq!(s.local_size().await.unwrap(), 1);
        let found = s.get_retained_message("a/b").await.unwrap().strict().unwrap().unwrap();
        assert_eq!(found.payload().as_ref(), b"hello");
        assert_eq!(found.qos(), QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn replace_remove_clear() {
        let n = node(1);
        let s = n.store("p1");
        s.add_or_replace(msg("t", "v1")).await.unwrap();
        s.add_or_replace(msg("t", "v2")).await.unwrap();
        let list = s.get_local_retained_messages().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].payload().as_ref(), b"v2");

        s.remove("t").await.unwrap();
        assert!(!s.contains_locally("t").await.unwrap());
        // unknown topic
        s.remove("nothing/here").await.unwrap();

        s.add_or_replace(msg("a", "1")).await.unwrap();
        s.add_or_replace(msg("b", "2")).await.unwrap();
        s.add_or_replace(msg("c", "3")).await.unwrap();
        assert_eq!(s.size().await.unwrap().strict(), Ok(3));
        s.clear().await.unwrap();
        assert_eq!(s.size().await.unwrap().strict(), Ok(0));
        assert_eq!(s.local_size().await.unwrap(), 0);
        assert!(s.get_local_retained_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_payload_removes() {
        let n = node(1);
        let s = n.store("broker");
        s.on_retained_publish("dev/1", "on", QoS::AtMostOnce).await.unwrap();
        assert!(s.contains_locally("dev/1").await.unwrap());
        s.on_retained_publish("dev/1", "", QoS::AtMostOnce).await.unwrap();
        assert!(!s.contains_locally("dev/1").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_topics() {
        let n = node(1);
        let s = n.store("p1");
        assert!(matches!(s.contains_locally("").await, Err(RetainError::InvalidTopic(_))));
        assert!(matches!(s.get_retained_message("a/+").await, Err(RetainError::InvalidTopic(_))));
        assert!(matches!(s.remove("#").await, Err(RetainError::InvalidTopic(_))));
        assert!(matches!(
            s.on_retained_publish("a/#", "x", QoS::AtMostOnce).await,
            Err(RetainError::InvalidTopic(_))
        ));
    }

    #[tokio::test]
    async fn rate_limited_call_has_no_effect() {
        let n = Retainer::new(settings(1, |inner| {
            inner.limiter.mutate = Rate::new(2, Duration::from_secs(60));
        }))
        .unwrap();
        let s = n.store("p1");
        s.add_or_replace(msg("a", "1")).await.unwrap();
        s.add_or_replace(msg("b", "2")).await.unwrap();
        assert_eq!(s.add_or_replace(msg("c", "3")).await, Err(RetainError::RateLimitExceeded("p1".into())));
        assert!(!s.contains_locally("c").await.unwrap());
        assert_eq!(s.local_size().await.unwrap(), 2);

        // reads have their own budget, other callers their own buckets
        assert!(s.size().await.is_ok());
        n.store("p2").add_or_replace(msg("c", "3")).await.unwrap();
        assert!(s.contains_locally("c").await.unwrap());
    }

    #[tokio::test]
    async fn quota_exceeded() {
        let n = Retainer::new(settings(1, |inner| {
            inner.store.max_retained_messages = 1;
        }))
        .unwrap();
        let s = n.store("p1");
        s.add_or_replace(msg("a", "1")).await.unwrap();
        assert!(matches!(s.add_or_replace(msg("b", "2")).await, Err(RetainError::QuotaExceeded(_))));
        s.add_or_replace(msg("a", "11")).await.unwrap();
    }

    #[tokio::test]
    async fn replication_and_global_reads() {
        let (nodes, _clients) = cluster(3);
        let s1 = nodes[0].store("p1");
        let s3 = nodes[2].store("p3");

        s1.add_or_replace(msg("room/1", "21C")).await.unwrap();
        settle().await;
        assert!(s3.contains_locally("room/1").await.unwrap());
        assert_eq!(s3.size().await.unwrap().strict(), Ok(1));

        s3.remove("room/1").await.unwrap();
        settle().await;
        assert!(!s1.contains_locally("room/1").await.unwrap());
        assert!(!s1.contains("room/1").await.unwrap().value);

        s1.add_or_replace(msg("a", "1")).await.unwrap();
        s3.add_or_replace(msg("b", "2")).await.unwrap();
        settle().await;
        let all = s1.get_retained_messages().await.unwrap();
        assert!(all.is_complete());
        assert_eq!(all.value.len(), 2);

        // clear removes what node 1 holds, replicated entries included
        s1.clear().await.unwrap();
        settle().await;
        assert!(s3.get_retained_messages().await.unwrap().strict().unwrap().is_empty());
        assert_eq!(nodes[1].entry_store().size(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_converge() {
        let (nodes, _clients) = cluster(2);
        let s1 = nodes[0].store("p1");
        let s2 = nodes[1].store("p2");
        let (r1, r2) =
            futures::future::join(s1.add_or_replace(msg("t", "one")), s2.add_or_replace(msg("t", "two"))).await;
        r1.unwrap();
        r2.unwrap();
        settle().await;
        let v1 = s1.get_retained_message("t").await.unwrap().strict().unwrap().unwrap();
        let v2 = s2.get_retained_message("t").await.unwrap().strict().unwrap().unwrap();
        assert_eq!(v1, v2);
        assert_eq!(nodes[0].entry_store().get("t"), nodes[1].entry_store().get("t"));
    }

    #[tokio::test]
    async fn unreachable_peer_is_soft() {
        let (nodes, clients) = cluster(2);
        for c in clients.iter() {
            c.set_available(false);
        }
        let s = nodes[0].store("p1");
        s.add_or_replace(msg("a", "1")).await.unwrap();
        let size = s.size().await.unwrap();
        assert_eq!(size.value, 1);
        assert_eq!(size.missing, vec![2]);
        assert_eq!(size.strict(), Err(RetainError::ClusterTimeout(vec![2])));
        // local variants do not touch the peers
        assert_eq!(s.local_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_mutation_still_applies() {
        let n = node(1);
        let s = n.store("p1");
        s.add_or_replace(msg("a", "1")).cancel();
        settle().await;
        assert!(s.contains_locally("a").await.unwrap());
    }
}
