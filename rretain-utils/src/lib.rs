//! Utilities shared by the rretain crates
//!
//! ## Core Features:
//! - **Byte Size Handling**: `1M`, `512K` style sizes with [`Bytesize`]
//! - **Duration Conversion**: `3s`, `500ms`, `1h30m` style durations for configuration files
//! - **Timestamp Utilities**: millisecond wall-clock timestamps used to stamp retained message versions
//! - **Node Addressing**: cluster peers written as `ID@host:port` ([`NodeAddr`])
//! - **Counter**: lock-free current/max counter ([`Counter`])
//!
//! ```
//! use rretain_utils::{Bytesize, NodeAddr, to_duration};
//!
//! let size = Bytesize::from("1M512K");
//! assert_eq!(size.as_usize(), 1_572_864);
//!
//! let timeout = to_duration("1s500ms");
//! assert_eq!(timeout.as_millis(), 1500);
//!
//! let peer: NodeAddr = "2@127.0.0.1:5364".parse().unwrap();
//! assert_eq!(peer.id, 2);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Error};
use bytestring::ByteString;
use serde::{
    de::{self, Deserializer},
    ser::Serializer,
    Deserialize, Serialize,
};

mod counter;

pub use counter::Counter;

/// Cluster node identifier
pub type NodeId = u64;

/// Network address, `host:port`
pub type Addr = ByteString;

/// Milliseconds since Unix epoch
pub type TimestampMillis = i64;

const BYTESIZE_K: usize = 1024;
const BYTESIZE_M: usize = 1048576;
const BYTESIZE_G: usize = 1073741824;

/// Human-readable byte size, e.g. `"1M"` or `"2G512M"`
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytesize(pub usize);

impl Bytesize {
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn string(&self) -> String {
        let mut v = self.0;
        let mut res = String::new();
        for (unit, size) in [('G', BYTESIZE_G), ('M', BYTESIZE_M), ('K', BYTESIZE_K)] {
            let n = v / size;
            if n > 0 {
                res.push_str(&format!("{n}{unit}"));
                v %= size;
            }
        }
        if v > 0 || res.is_empty() {
            res.push_str(&format!("{v}B"));
        }
        res
    }
}

impl Deref for Bytesize {
    type Target = usize;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<usize> for Bytesize {
    fn from(v: usize) -> Self {
        Bytesize(v)
    }
}

impl From<&str> for Bytesize {
    fn from(v: &str) -> Self {
        Bytesize(to_bytesize(v))
    }
}

impl fmt::Debug for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl Serialize for Bytesize {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.string())
    }
}

impl<'de> Deserialize<'de> for Bytesize {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Bytesize(to_bytesize(&String::deserialize(deserializer)?)))
    }
}

/// Parse a byte size string such as `"1G500M"`; unknown parts count as zero
#[inline]
pub fn to_bytesize(text: &str) -> usize {
    let text = text.to_uppercase().replace("GB", "G").replace("MB", "M").replace("KB", "K");
    text.split_inclusive(['G', 'M', 'K', 'B'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<usize>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'B' => v,
                'K' => v * BYTESIZE_K,
                'M' => v * BYTESIZE_M,
                'G' => v * BYTESIZE_G,
                _ => 0,
            }
        })
        .sum()
}

#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

#[inline]
pub fn serialize_duration<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    format!("{}ms", d.as_millis()).serialize(s)
}

/// Convert a duration string to [`Duration`]
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`.
///
/// ```
/// let d = rretain_utils::to_duration("1h30m15s");
/// assert_eq!(d.as_secs(), 5415);
/// assert_eq!(rretain_utils::to_duration("250ms").as_millis(), 250);
/// ```
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.to_lowercase().replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                'w' => v * 604800000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    if t <= 0 {
        "".into()
    } else {
        use chrono::TimeZone;
        if let chrono::LocalResult::Single(t) = chrono::Local.timestamp_millis_opt(t) {
            t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        } else {
            "".into()
        }
    }
}

/// Cluster peer address written as `ID@host:port`
///
/// ```
/// use rretain_utils::NodeAddr;
///
/// let node: NodeAddr = "3@10.0.0.3:5363".parse().unwrap();
/// assert_eq!(node.id, 3);
/// assert_eq!(node.addr, "10.0.0.3:5363");
/// ```
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct NodeAddr {
    pub id: NodeId,
    pub addr: Addr,
}

impl std::fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:?}", self.id, self.addr)
    }
}

impl FromStr for NodeAddr {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s.split_once('@').ok_or_else(|| anyhow!("NodeAddr format error, {}", s))?;
        if addr.is_empty() {
            return Err(anyhow!("NodeAddr format error, empty address, {}", s));
        }
        let id = NodeId::from_str(id.trim())?;
        Ok(NodeAddr { id, addr: Addr::from(addr.trim()) })
    }
}

impl<'de> de::Deserialize<'de> for NodeAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        NodeAddr::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytesize() {
        assert_eq!(to_bytesize("1M"), 1048576);
        assert_eq!(to_bytesize("1KB"), 1024);
        assert_eq!(to_bytesize("2G512M"), 2_684_354_560);
        assert_eq!(to_bytesize("abc"), 0);
        assert_eq!(Bytesize(3145728).string(), "3M");
        assert_eq!(Bytesize(1025).string(), "1K1B");
        assert_eq!(Bytesize(0).string(), "0B");
    }

    #[test]
    fn duration() {
        assert_eq!(to_duration("3s"), Duration::from_secs(3));
        assert_eq!(to_duration("500ms"), Duration::from_millis(500));
        assert_eq!(to_duration("1m30s"), Duration::from_secs(90));
        assert_eq!(to_duration("0"), Duration::ZERO);
    }

    #[test]
    fn node_addr() {
        let n = NodeAddr::from_str("1@127.0.0.1:5363").unwrap();
        assert_eq!(n.id, 1);
        assert_eq!(n.addr, "127.0.0.1:5363");
        assert!(NodeAddr::from_str("127.0.0.1:5363").is_err());
        assert!(NodeAddr::from_str("x@127.0.0.1:5363").is_err());
        assert!(NodeAddr::from_str("1@").is_err());
    }
}
