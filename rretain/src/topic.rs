//! Topic name validation.
//!
//! Retained messages are keyed by concrete topic names. A name is split on `/`
//! into levels; wildcard levels (`+`, `#`) belong to topic filters and are
//! rejected here, as are empty names, names longer than the MQTT string limit
//! and names containing NUL.

use std::fmt;
use std::str::FromStr;

use bytestring::ByteString;

/// Concrete topic name, cheap to clone
pub type TopicName = ByteString;

pub const MAX_TOPIC_LEN: usize = 65535;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("empty topic")]
    Empty,
    #[error("topic too long, {0} bytes")]
    TooLong(usize),
    #[error("topic `{0}` contains NUL")]
    Nul(String),
    #[error("topic `{0}` contains wildcard level `{1}`")]
    Wildcard(String, Level),
    #[error("invalid level `{0}` contains +|#")]
    InvalidLevel(String),
}

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS
    Blank,
    SingleWildcard, // +
    MultiWildcard,  // #
}

impl Level {
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Level::SingleWildcard | Level::MultiWildcard)
    }
}

impl FromStr for Level {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        match s {
            "+" => Ok(Level::SingleWildcard),
            "#" => Ok(Level::MultiWildcard),
            "" => Ok(Level::Blank),
            _ => {
                if s.contains(['+', '#']) {
                    Err(TopicError::InvalidLevel(s.into()))
                } else if s.starts_with('$') {
                    Ok(Level::Metadata(String::from(s)))
                } else {
                    Ok(Level::Normal(String::from(s)))
                }
            }
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Normal(ref s) | Level::Metadata(ref s) => f.write_str(s.as_str()),
            Level::Blank => Ok(()),
            Level::SingleWildcard => f.write_str("+"),
            Level::MultiWildcard => f.write_str("#"),
        }
    }
}

/// Split a topic name into levels, rejecting anything that is not a concrete name.
pub fn levels(topic: &str) -> Result<Vec<Level>, TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(TopicError::Nul(topic.into()));
    }
    topic
        .split('/')
        .map(|l| match Level::from_str(l)? {
            level if level.is_wildcard() => Err(TopicError::Wildcard(topic.into(), level)),
            level => Ok(level),
        })
        .collect()
}

#[inline]
pub fn validate(topic: &str) -> Result<(), TopicError> {
    levels(topic).map(|_| ())
}

#[inline]
pub fn topic_name(topic: &str) -> Result<TopicName, TopicError> {
    validate(topic)?;
    Ok(TopicName::from(topic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(validate("a/b").is_ok());
        assert!(validate("/a/b/").is_ok());
        assert!(validate("$SYS/brokers").is_ok());
        assert!(validate("a//b").is_ok());
        assert_eq!(levels("$SYS/x").unwrap()[0], Level::Metadata("$SYS".into()));
        assert_eq!(levels("/x").unwrap()[0], Level::Blank);
    }

    #[test]
    fn invalid_names() {
        assert_eq!(validate(""), Err(TopicError::Empty));
        assert_eq!(validate("a/+/b"), Err(TopicError::Wildcard("a/+/b".into(), Level::SingleWildcard)));
        assert_eq!(validate("a/#"), Err(TopicError::Wildcard("a/#".into(), Level::MultiWildcard)));
        assert_eq!(validate("a/b+"), Err(TopicError::InvalidLevel("b+".into())));
        assert!(matches!(validate("a\0b"), Err(TopicError::Nul(_))));
        assert_eq!(validate(&"x".repeat(MAX_TOPIC_LEN + 1)), Err(TopicError::TooLong(MAX_TOPIC_LEN + 1)));
        assert!(validate(&"x".repeat(MAX_TOPIC_LEN)).is_ok());
    }
}
