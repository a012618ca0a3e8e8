#![deny(unsafe_code)]

//! # Retained message store service
//!
//! A per-topic "last known message" cache that broker plugins reach through a
//! non-blocking, rate-limited service. Every node owns an [`store::EntryStore`];
//! the [`cluster::ClusterView`] replicates local mutations to peers and merges
//! their state into global reads with last-writer-wins on the message version.
//!
//! ```text
//! caller -> Limiter -> Executor (PendingResult) -> Router -+-> EntryStore            (local)
//!                                                          +-> EntryStore + peers    (global)
//!                                                          +-> EntryStore -> outbound queue (mutations)
//! ```
//!
//! ```rust,no_run
//! use rretain::{AsyncRetainedMessageStore, QoS, RetainedMessage, Retainer};
//! use rretain_conf::Settings;
//!
//! #[tokio::main]
//! async fn main() -> rretain::Result<()> {
//!     let retainer = Retainer::new(Settings::default())?;
//!     let store = retainer.store("my-plugin");
//!
//!     store.add_or_replace(RetainedMessage::new("a/b", "hello", QoS::AtLeastOnce)?).await?;
//!     let found = store.get_retained_message("a/b").await?;
//!     assert!(found.value.is_some());
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod connect;
pub mod error;
pub mod limiter;
pub mod logger;
pub mod retainer;
pub mod router;
pub mod service;
pub mod store;
pub mod task;
pub mod topic;
pub mod types;

pub use error::{RetainError, RetainResult};
pub use retainer::Retainer;
pub use service::{AsyncRetainedMessageStore, RetainedMessageStore};
pub use task::PendingResult;
pub use types::{CallerId, ClusterRead, QoS, RetainedMessage, Version};

pub use rretain_conf as conf;
pub use rretain_utils as utils;

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;
