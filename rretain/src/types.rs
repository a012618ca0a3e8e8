use std::cmp::max;
use std::fmt;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::{RetainError, RetainResult};
use crate::topic::{self, TopicName};
use crate::utils::{format_timestamp_millis, timestamp_millis, NodeId, TimestampMillis};

/// Identity a service handle is admitted under, usually the plugin name
pub type CallerId = ByteString;

pub type Payload = Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = crate::Error;

    fn try_from(qos: u8) -> crate::Result<Self> {
        match qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(anyhow::anyhow!("invalid qos {qos}")),
        }
    }
}

/// Last-writer-wins version of a retained entry.
///
/// Ordered by `timestamp`, then `node_id`, so two different writers never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Version {
    pub timestamp: TimestampMillis,
    pub node_id: NodeId,
}

impl Version {
    pub const ZERO: Version = Version { timestamp: 0, node_id: 0 };

    #[inline]
    pub fn new(timestamp: TimestampMillis, node_id: NodeId) -> Self {
        Self { timestamp, node_id }
    }

    /// Version for a local write that replaces `prev`, never older than it.
    #[inline]
    pub fn next(node_id: NodeId, prev: Option<&Version>) -> Self {
        let now = timestamp_millis();
        let timestamp = match prev {
            Some(prev) => max(now, prev.timestamp.saturating_add(1)),
            None => now,
        };
        Self { timestamp, node_id }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", format_timestamp_millis(self.timestamp), self.node_id)
    }
}

/// Retained message of one topic. An empty payload marks a removed topic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedMessage {
    topic: TopicName,
    payload: Payload,
    qos: QoS,
    version: Version,
}

impl fmt::Debug for RetainedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetainedMessage {{ topic: {:?}, payload: {} bytes, qos: {:?}, version: {} }}",
            self.topic,
            self.payload.len(),
            self.qos,
            self.version
        )
    }
}

impl RetainedMessage {
    #[inline]
    pub fn new<P: Into<Payload>>(topic: &str, payload: P, qos: QoS) -> RetainResult<Self> {
        Ok(Self { topic: topic::topic_name(topic)?, payload: payload.into(), qos, version: Version::ZERO })
    }

    #[inline]
    pub(crate) fn tombstone(topic: TopicName, version: Version) -> Self {
        Self { topic, payload: Payload::new(), qos: QoS::AtMostOnce, version }
    }

    #[inline]
    pub(crate) fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    #[inline]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    #[inline]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Result of a cluster-wide read.
///
/// `missing` lists the peers whose state is not reflected in `value` because
/// they failed or did not answer within the read timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRead<T> {
    pub value: T,
    pub missing: Vec<NodeId>,
}

impl<T> ClusterRead<T> {
    #[inline]
    pub fn complete(value: T) -> Self {
        Self { value, missing: Vec::new() }
    }

    #[inline]
    pub fn partial(value: T, missing: Vec<NodeId>) -> Self {
        Self { value, missing }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Degraded reads become `ClusterTimeout`.
    #[inline]
    pub fn strict(self) -> RetainResult<T> {
        if self.missing.is_empty() {
            Ok(self.value)
        } else {
            Err(RetainError::ClusterTimeout(self.missing))
        }
    }

    #[inline]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ClusterRead<U> {
        ClusterRead { value: f(self.value), missing: self.missing }
    }

    #[inline]
    pub fn try_map<U, F: FnOnce(T) -> RetainResult<U>>(self, f: F) -> RetainResult<ClusterRead<U>> {
        Ok(ClusterRead { value: f(self.value)?, missing: self.missing })
    }

    #[inline]
    pub fn into_value(self) -> T {
        self.value
    }
}
