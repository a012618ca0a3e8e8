//! Node-local retained message storage.
//!
//! One entry per topic in a sharded concurrent map; every write to a topic
//! happens under that topic's entry lock, so operations on the same topic are
//! linearizable while different topics proceed in parallel. Removed topics keep
//! a tombstone so that older replicated writes can not bring them back.

use std::time::Duration;

use dashmap::mapref::entry::Entry;

use crate::conf;
use crate::error::{RetainError, RetainResult};
use crate::topic::TopicName;
use crate::types::{RetainedMessage, Version};
use crate::utils::{timestamp_millis, Counter, NodeId};
use crate::DashMap;

pub struct EntryStore {
    node_id: NodeId,
    cfg: conf::Store,
    entries: DashMap<TopicName, RetainedMessage>,
    //entries that are not tombstones, expired ones included until removed
    retaineds: Counter,
}

impl EntryStore {
    pub fn new(node_id: NodeId, cfg: conf::Store) -> Self {
        Self { node_id, cfg, entries: DashMap::default(), retaineds: Counter::new() }
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[inline]
    pub fn cfg(&self) -> &conf::Store {
        &self.cfg
    }

    /// Store `msg` as the retained message of its topic, replacing the previous one.
    ///
    /// The returned message carries the version stamped by this node. An empty
    /// payload removes the topic and returns its tombstone.
    pub fn add_or_replace(&self, msg: RetainedMessage) -> RetainResult<RetainedMessage> {
        if msg.is_tombstone() {
            return Ok(self.remove(msg.topic()));
        }

        let max_payload_size = self.cfg.max_payload_size.as_usize();
        if max_payload_size > 0 && msg.payload().len() > max_payload_size {
            log::warn!("retained message payload exceeding limit, {:?}", msg);
            return Err(RetainError::QuotaExceeded(format!(
                "payload of {} bytes exceeds max_payload_size {:?}",
                msg.payload().len(),
                self.cfg.max_payload_size
            )));
        }

        match self.entries.entry(msg.topic().clone()) {
            Entry::Occupied(mut e) => {
                if e.get().is_tombstone() {
                    self.reserve(&msg)?;
                }
                let msg = msg.with_version(Version::next(self.node_id, Some(e.get().version())));
                e.insert(msg.clone());
                Ok(msg)
            }
            Entry::Vacant(e) => {
                self.reserve(&msg)?;
                let msg = msg.with_version(Version::next(self.node_id, None));
                e.insert(msg.clone());
                Ok(msg)
            }
        }
    }

    //takes one slot of max_retained_messages, the count is bumped atomically with the check
    #[inline]
    fn reserve(&self, msg: &RetainedMessage) -> RetainResult<()> {
        let max = self.cfg.max_retained_messages;
        if max == 0 {
            self.retaineds.inc();
            return Ok(());
        }
        if !self.retaineds.inc_limited(max as isize) {
            log::warn!("the retained messages have reached the maximum limit of {}, {:?}", max, msg);
            return Err(RetainError::QuotaExceeded(format!("max_retained_messages {max} reached")));
        }
        Ok(())
    }

    /// Replace the entry of `topic` with a tombstone, returns the tombstone.
    pub fn remove(&self, topic: &TopicName) -> RetainedMessage {
        match self.entries.entry(topic.clone()) {
            Entry::Occupied(mut e) => {
                let occupied = !e.get().is_tombstone();
                let tombstone =
                    RetainedMessage::tombstone(topic.clone(), Version::next(self.node_id, Some(e.get().version())));
                e.insert(tombstone.clone());
                if occupied {
                    self.retaineds.dec();
                }
                tombstone
            }
            Entry::Vacant(e) => {
                let tombstone = RetainedMessage::tombstone(topic.clone(), Version::next(self.node_id, None));
                e.insert(tombstone.clone());
                tombstone
            }
        }
    }

    /// Remove every retained message, returns one tombstone per removed topic.
    pub fn clear(&self) -> Vec<RetainedMessage> {
        let topics = self
            .entries
            .iter()
            .filter(|e| !e.value().is_tombstone())
            .map(|e| e.key().clone())
            .collect::<Vec<_>>();
        topics.iter().map(|topic| self.remove(topic)).collect()
    }

    #[inline]
    pub fn get(&self, topic: &str) -> Option<RetainedMessage> {
        self.entries.get(topic).and_then(|e| if self.is_live(e.value()) { Some(e.value().clone()) } else { None })
    }

    #[inline]
    pub fn contains(&self, topic: &str) -> bool {
        self.entries.get(topic).map(|e| self.is_live(e.value())).unwrap_or_default()
    }

    #[inline]
    pub fn size(&self) -> usize {
        if self.cfg.expiry_interval.is_zero() {
            self.retaineds.count().max(0) as usize
        } else {
            self.entries.iter().filter(|e| self.is_live(e.value())).count()
        }
    }

    pub fn list_all(&self) -> Vec<RetainedMessage> {
        self.entries.iter().filter(|e| self.is_live(e.value())).map(|e| e.value().clone()).collect()
    }

    /// Raw entry of `topic`, tombstones and expired messages included.
    #[inline]
    pub fn entry(&self, topic: &str) -> Option<RetainedMessage> {
        self.entries.get(topic).map(|e| e.value().clone())
    }

    /// Raw entries, tombstones and expired messages included.
    pub fn entries(&self) -> Vec<RetainedMessage> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Apply a replicated entry if it is strictly newer than the stored one.
    pub fn merge(&self, msg: RetainedMessage) -> bool {
        match self.entries.entry(msg.topic().clone()) {
            Entry::Occupied(mut e) => {
                if msg.version() <= e.get().version() {
                    return false;
                }
                let was_occupied = !e.get().is_tombstone();
                let occupied = !msg.is_tombstone();
                e.insert(msg);
                match (was_occupied, occupied) {
                    (false, true) => self.retaineds.inc(),
                    (true, false) => self.retaineds.dec(),
                    _ => {}
                }
                true
            }
            Entry::Vacant(e) => {
                if !msg.is_tombstone() {
                    self.retaineds.inc();
                }
                e.insert(msg);
                true
            }
        }
    }

    /// Visible to readers: not a tombstone and not expired
    #[inline]
    pub fn is_live(&self, msg: &RetainedMessage) -> bool {
        !msg.is_tombstone() && !self.is_expired(msg)
    }

    #[inline]
    fn is_expired(&self, msg: &RetainedMessage) -> bool {
        !self.cfg.expiry_interval.is_zero()
            && timestamp_millis() - msg.version().timestamp >= self.cfg.expiry_interval.as_millis() as i64
    }

    /// Drop expired retained messages, returns how many were dropped.
    pub fn remove_expired_messages(&self) -> usize {
        if self.cfg.expiry_interval.is_zero() {
            return 0;
        }
        let topics = self
            .entries
            .iter()
            .filter(|e| !e.value().is_tombstone() && self.is_expired(e.value()))
            .map(|e| e.key().clone())
            .collect::<Vec<_>>();
        let mut removeds = 0;
        for topic in topics {
            if self.entries.remove_if(&topic, |_, m| !m.is_tombstone() && self.is_expired(m)).is_some() {
                self.retaineds.dec();
                removeds += 1;
            }
        }
        removeds
    }

    /// Drop tombstones older than `older_than`, returns how many were dropped.
    pub fn purge_tombstones(&self, older_than: Duration) -> usize {
        let older_than = older_than.as_millis() as i64;
        let now = timestamp_millis();
        let topics = self
            .entries
            .iter()
            .filter(|e| e.value().is_tombstone() && now - e.value().version().timestamp >= older_than)
            .map(|e| e.key().clone())
            .collect::<Vec<_>>();
        topics
            .into_iter()
            .filter(|topic| {
                self.entries
                    .remove_if(topic, |_, m| m.is_tombstone() && now - m.version().timestamp >= older_than)
                    .is_some()
            })
            .count()
    }

    #[inline]
    pub fn max(&self) -> isize {
        self.retaineds.max()
    }

    #[inline]
    pub fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "retaineds": self.retaineds.to_json(),
            "entries": self.entries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QoS;
    use crate::utils::Bytesize;

    fn msg(topic: &str, payload: &'static str) -> RetainedMessage {
        RetainedMessage::new(topic, payload, QoS::AtLeastOnce).unwrap()
    }

    fn store() -> EntryStore {
        EntryStore::new(1, conf::Store::default())
    }

    #[test]
    fn add_get_replace() {
        let s = store();
        let first = s.add_or_replace(msg("a/b", "v1")).unwrap();
        assert_eq!(first.version().node_id, 1);
        assert!(s.contains("a/b"));
        assert_eq!(s.size(), 1);

        let second = s.add_or_replace(msg("a/b", "v2")).unwrap();
        assert!(second.version() > first.version());
        assert_eq!(s.get("a/b").unwrap().payload().as_ref(), b"v2");
        assert_eq!(s.size(), 1);
        assert!(s.get("a/c").is_none());
    }

    #[test]
    fn remove_and_clear() {
        let s = store();
        s.add_or_replace(msg("a", "1")).unwrap();
        s.add_or_replace(msg("b", "2")).unwrap();
        s.add_or_replace(msg("c", "3")).unwrap();

        let t = s.remove(&TopicName::from("a"));
        assert!(t.is_tombstone());
        assert!(!s.contains("a"));
        assert!(s.entry("a").unwrap().is_tombstone());
        assert_eq!(s.size(), 2);

        // absent topic
        assert!(s.remove(&TopicName::from("zz")).is_tombstone());
        assert_eq!(s.size(), 2);

        // empty payload removes
        assert!(s.add_or_replace(msg("b", "")).unwrap().is_tombstone());
        assert_eq!(s.size(), 1);

        let tombstones = s.clear();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(&**tombstones[0].topic(), "c");
        assert_eq!(s.size(), 0);
        assert!(s.list_all().is_empty());
        assert_eq!(s.entries().len(), 4);
        assert!(s.clear().is_empty());
    }

    #[test]
    fn merge_last_writer_wins() {
        let s = store();
        let older = msg("t", "old").with_version(Version::new(100, 2));
        let newer = msg("t", "new").with_version(Version::new(100, 3));
        assert!(s.merge(newer.clone()));
        assert!(!s.merge(older));
        assert!(!s.merge(newer.clone()));
        assert_eq!(s.get("t").unwrap(), newer);

        // a local write always supersedes what it replaces
        let local = s.add_or_replace(msg("t", "local")).unwrap();
        assert!(local.version() > newer.version());
    }

    #[test]
    fn tombstone_beats_late_older_write() {
        let s = store();
        let written = s.add_or_replace(msg("t", "v")).unwrap();
        s.remove(&TopicName::from("t"));
        assert!(!s.merge(msg("t", "late").with_version(written.version().to_owned())));
        assert!(s.get("t").is_none());
        assert_eq!(s.size(), 0);

        let tombstone = RetainedMessage::tombstone("u".into(), Version::new(timestamp_millis() + 1000, 9));
        assert!(s.merge(tombstone));
        assert!(!s.merge(msg("u", "late").with_version(Version::new(timestamp_millis(), 9))));
        assert!(!s.contains("u"));
    }

    #[test]
    fn retention_limits() {
        let cfg = conf::Store { max_retained_messages: 2, max_payload_size: Bytesize::from(4usize), ..Default::default() };
        let s = EntryStore::new(1, cfg);
        assert!(matches!(s.add_or_replace(msg("big", "12345")), Err(RetainError::QuotaExceeded(_))));
        s.add_or_replace(msg("a", "1")).unwrap();
        s.add_or_replace(msg("b", "2")).unwrap();
        assert!(matches!(s.add_or_replace(msg("c", "3")), Err(RetainError::QuotaExceeded(_))));
        // replacing is always allowed
        s.add_or_replace(msg("a", "11")).unwrap();
        s.remove(&TopicName::from("b"));
        s.add_or_replace(msg("c", "3")).unwrap();
        assert_eq!(s.size(), 2);
        assert_eq!(s.max(), 2);
    }

    #[test]
    fn expiry() {
        let cfg = conf::Store { expiry_interval: Duration::from_millis(50), ..Default::default() };
        let s = EntryStore::new(1, cfg);
        s.add_or_replace(msg("a", "1")).unwrap();
        assert!(s.contains("a"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(s.get("a").is_none());
        assert_eq!(s.size(), 0);
        assert!(s.list_all().is_empty());
        assert_eq!(s.remove_expired_messages(), 1);
        assert!(s.entry("a").is_none());
    }

    #[test]
    fn purge() {
        let s = store();
        s.add_or_replace(msg("a", "1")).unwrap();
        s.remove(&TopicName::from("a"));
        assert_eq!(s.purge_tombstones(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(s.purge_tombstones(Duration::from_millis(10)), 1);
        assert!(s.entries().is_empty());
    }

    #[test]
    fn retention_limit_under_contention() {
        use std::sync::{Arc, Barrier};

        let threads = 16;
        for round in 0..200 {
            let s = Arc::new(EntryStore::new(1, conf::Store { max_retained_messages: 1, ..Default::default() }));
            let barrier = Arc::new(Barrier::new(threads));
            let handles = (0..threads)
                .map(|i| {
                    let s = s.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        s.add_or_replace(msg(&format!("t/{}/{}", round, i), "v")).is_ok()
                    })
                })
                .collect::<Vec<_>>();
            let accepteds = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
            assert_eq!(accepteds, 1);
            assert_eq!(s.size(), 1);
            assert_eq!(s.list_all().len(), 1);
        }
    }
}
