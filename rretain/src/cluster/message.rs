use serde::{Deserialize, Serialize};

use crate::topic::TopicName;
use crate::types::RetainedMessage;
use crate::Result;

/// Requests exchanged between the nodes of a cluster
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Replicated local writes, tombstones included
    Mutations(Vec<RetainedMessage>),
    GetRetain(TopicName),
    GetRetains,
}

impl Message {
    #[inline]
    pub fn typ(&self) -> &'static str {
        match self {
            Message::Mutations(_) => "Mutations",
            Message::GetRetain(_) => "GetRetain",
            Message::GetRetains => "GetRetains",
        }
    }

    #[inline]
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self).map_err(anyhow::Error::new)?)
    }

    #[inline]
    pub fn decode(data: &[u8]) -> Result<Message> {
        Ok(bincode::deserialize::<Message>(data).map_err(anyhow::Error::new)?)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum MessageReply {
    Success,
    /// Raw entry, the reader decides whether a tombstone wins
    Retain(Option<RetainedMessage>),
    Retains(Vec<RetainedMessage>),
    Error(String),
}

impl MessageReply {
    #[inline]
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self).map_err(anyhow::Error::new)?)
    }

    #[inline]
    pub fn decode(data: &[u8]) -> Result<MessageReply> {
        Ok(bincode::deserialize::<MessageReply>(data).map_err(anyhow::Error::new)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QoS, Version};

    #[test]
    fn codec() {
        let m = RetainedMessage::new("a/b", "x", QoS::ExactlyOnce).unwrap().with_version(Version::new(5, 2));
        let msg = Message::Mutations(vec![m.clone(), RetainedMessage::tombstone("c".into(), Version::new(6, 2))]);
        assert_eq!(Message::decode(&msg.encode().unwrap()).unwrap(), msg);

        let reply = MessageReply::Retain(Some(m));
        assert_eq!(MessageReply::decode(&reply.encode().unwrap()).unwrap(), reply);

        assert!(Message::decode(&[0xff, 0xff, 0xff]).is_err());
    }
}
