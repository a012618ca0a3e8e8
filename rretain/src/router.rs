use std::time::Duration;

use crate::cluster::ClusterView;
use crate::error::{RetainError, RetainResult};
use crate::limiter::Category;
use crate::topic::TopicName;
use crate::types::{ClusterRead, RetainedMessage};

/// Where an operation is served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// This node's entry store only
    Local,
    /// The entry store merged with every peer's state
    Global,
    /// Applied to the entry store, then broadcast to the peers
    Propagated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetLocalRetainedMessages,
    LocalSize,
    ContainsLocally(TopicName),
    GetRetainedMessages,
    GetRetainedMessage(TopicName),
    Contains(TopicName),
    Size,
    Remove(TopicName),
    Clear,
    AddOrReplace(RetainedMessage),
}

impl Operation {
    #[inline]
    pub fn scope(&self) -> Scope {
        match self {
            Operation::GetLocalRetainedMessages | Operation::LocalSize | Operation::ContainsLocally(_) => {
                Scope::Local
            }
            Operation::GetRetainedMessages
            | Operation::GetRetainedMessage(_)
            | Operation::Contains(_)
            | Operation::Size => Scope::Global,
            Operation::Remove(_) | Operation::Clear | Operation::AddOrReplace(_) => Scope::Propagated,
        }
    }

    #[inline]
    pub fn category(&self) -> Category {
        match self.scope() {
            Scope::Local | Scope::Global => Category::Read,
            Scope::Propagated => Category::Mutate,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetLocalRetainedMessages => "get_local_retained_messages",
            Operation::LocalSize => "local_size",
            Operation::ContainsLocally(_) => "contains_locally",
            Operation::GetRetainedMessages => "get_retained_messages",
            Operation::GetRetainedMessage(_) => "get_retained_message",
            Operation::Contains(_) => "contains",
            Operation::Size => "size",
            Operation::Remove(_) => "remove",
            Operation::Clear => "clear",
            Operation::AddOrReplace(_) => "add_or_replace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Bool(bool),
    Size(usize),
    Message(Option<RetainedMessage>),
    Messages(Vec<RetainedMessage>),
}

macro_rules! reply_into {
    ($name:ident, $variant:ident, $ty:ty) => {
        #[inline]
        pub fn $name(self) -> RetainResult<$ty> {
            match self {
                Reply::$variant(v) => Ok(v),
                other => Err(RetainError::StoreUnavailable(format!("unexpected reply {:?}", other))),
            }
        }
    };
}

impl Reply {
    reply_into!(into_bool, Bool, bool);
    reply_into!(into_size, Size, usize);
    reply_into!(into_message, Message, Option<RetainedMessage>);
    reply_into!(into_messages, Messages, Vec<RetainedMessage>);

    #[inline]
    pub fn into_done(self) -> RetainResult<()> {
        match self {
            Reply::Done => Ok(()),
            other => Err(RetainError::StoreUnavailable(format!("unexpected reply {:?}", other))),
        }
    }
}

/// Sends each operation to the entry store alone or through the cluster view.
#[derive(Clone)]
pub struct Router {
    cluster: ClusterView,
    read_timeout: Duration,
}

impl Router {
    pub fn new(cluster: ClusterView, read_timeout: Duration) -> Self {
        Self { cluster, read_timeout }
    }

    pub async fn dispatch(&self, op: Operation) -> RetainResult<ClusterRead<Reply>> {
        log::trace!("dispatch {} ({:?})", op.name(), op.scope());
        let store = self.cluster.store();
        let t = self.read_timeout;
        let reply = match op {
            Operation::GetLocalRetainedMessages => ClusterRead::complete(Reply::Messages(store.list_all())),
            Operation::LocalSize => ClusterRead::complete(Reply::Size(store.size())),
            Operation::ContainsLocally(topic) => ClusterRead::complete(Reply::Bool(store.contains(&topic))),

            Operation::GetRetainedMessages => self.cluster.list(t).await.map(Reply::Messages),
            Operation::GetRetainedMessage(topic) => self.cluster.get(&topic, t).await.map(Reply::Message),
            Operation::Contains(topic) => self.cluster.contains(&topic, t).await.map(Reply::Bool),
            Operation::Size => self.cluster.size(t).await.map(Reply::Size),

            Operation::Remove(topic) => {
                let tombstone = store.remove(&topic);
                self.cluster.publish(vec![tombstone]);
                ClusterRead::complete(Reply::Done)
            }
            Operation::Clear => {
                let tombstones = store.clear();
                log::debug!("clear {} retained messages", tombstones.len());
                self.cluster.publish(tombstones);
                ClusterRead::complete(Reply::Done)
            }
            Operation::AddOrReplace(msg) => {
                let msg = store.add_or_replace(msg)?;
                self.cluster.publish(vec![msg]);
                ClusterRead::complete(Reply::Done)
            }
        };
        Ok(reply)
    }
}
