//! Validated connection records handed to the store by the broker.
//!
//! Only the data is modelled; decoding CONNECT frames and answering with
//! CONNACK is done elsewhere. A refused connection is an error value carrying
//! its return code.

use std::fmt;

use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::RetainResult;
use crate::topic;
use crate::types::{Payload, QoS, RetainedMessage};

const MAX_CLIENT_ID_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    #[inline]
    pub fn reason(self) -> &'static str {
        match self {
            ConnectReturnCode::Accepted => "Connection Accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => {
                "Connection Refused, unacceptable protocol version"
            }
            ConnectReturnCode::IdentifierRejected => "Connection Refused, identifier rejected",
            ConnectReturnCode::ServerUnavailable => "Connection Refused, Server unavailable",
            ConnectReturnCode::BadUsernameOrPassword => "Connection Refused, bad user name or password",
            ConnectReturnCode::NotAuthorized => "Connection Refused, not authorized",
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{return_code}, {reason}")]
pub struct RefusedConnection {
    pub return_code: ConnectReturnCode,
    pub reason: String,
}

impl RefusedConnection {
    #[inline]
    pub fn new<R: Into<String>>(return_code: ConnectReturnCode, reason: R) -> Self {
        Self { return_code, reason: reason.into() }
    }
}

/// Last will, published (and retained when `retain` is set) if the client goes away uncleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: ByteString,
    pub message: Payload,
    pub qos: QoS,
    pub retain: bool,
}

impl LastWill {
    #[inline]
    pub fn new<P: Into<Payload>>(topic: &str, message: P, qos: QoS, retain: bool) -> RetainResult<Self> {
        Ok(Self { topic: topic::topic_name(topic)?, message: message.into(), qos, retain })
    }

    /// Retained message the will leaves behind, `None` unless `retain` is set.
    #[inline]
    pub fn to_retained_message(&self) -> Option<RetainedMessage> {
        if self.retain {
            RetainedMessage::new(&self.topic, self.message.clone(), self.qos).ok()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    client_id: ByteString,
    protocol_version: u8,
    clean_session: bool,
    keep_alive: u16,
    last_will: Option<LastWill>,
    username: Option<ByteString>,
    password: Option<bytes::Bytes>,
    bridge: bool,
}

impl Connect {
    #[inline]
    pub fn builder<C: Into<ByteString>>(client_id: C) -> ConnectBuilder {
        ConnectBuilder::new(client_id)
    }

    #[inline]
    pub fn client_id(&self) -> &ByteString {
        &self.client_id
    }
    #[inline]
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }
    #[inline]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }
    #[inline]
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }
    #[inline]
    pub fn last_will(&self) -> Option<&LastWill> {
        self.last_will.as_ref()
    }
    #[inline]
    pub fn username(&self) -> Option<&ByteString> {
        self.username.as_ref()
    }
    #[inline]
    pub fn password(&self) -> Option<&bytes::Bytes> {
        self.password.as_ref()
    }
    #[inline]
    pub fn is_bridge(&self) -> bool {
        self.bridge
    }
}

#[derive(Debug, Clone)]
pub struct ConnectBuilder {
    client_id: ByteString,
    protocol_version: u8,
    clean_session: bool,
    keep_alive: u16,
    last_will: Option<(ByteString, Payload, QoS, bool)>,
    username: Option<ByteString>,
    password: Option<bytes::Bytes>,
    bridge: bool,
}

impl ConnectBuilder {
    fn new<C: Into<ByteString>>(client_id: C) -> Self {
        Self {
            client_id: client_id.into(),
            protocol_version: 4,
            clean_session: true,
            keep_alive: 60,
            last_will: None,
            username: None,
            password: None,
            bridge: false,
        }
    }

    pub fn protocol_version(mut self, v: u8) -> Self {
        self.protocol_version = v;
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive = secs;
        self
    }

    pub fn last_will<T, P>(mut self, topic: T, message: P, qos: QoS, retain: bool) -> Self
    where
        T: Into<ByteString>,
        P: Into<Payload>,
    {
        self.last_will = Some((topic.into(), message.into(), qos, retain));
        self
    }

    pub fn username<U: Into<ByteString>>(mut self, username: U) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password<P: Into<bytes::Bytes>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn bridge(mut self, bridge: bool) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn build(self) -> Result<Connect, RefusedConnection> {
        if !matches!(self.protocol_version, 3..=5) {
            return Err(RefusedConnection::new(
                ConnectReturnCode::UnacceptableProtocolVersion,
                format!("protocol version {}", self.protocol_version),
            ));
        }
        if self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(RefusedConnection::new(
                ConnectReturnCode::IdentifierRejected,
                format!("client id too long, {} bytes", self.client_id.len()),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(RefusedConnection::new(
                ConnectReturnCode::BadUsernameOrPassword,
                "password given without user name",
            ));
        }
        let last_will = match self.last_will {
            Some((topic, message, qos, retain)) => Some(
                LastWill::new(&topic, message, qos, retain)
                    .map_err(|e| RefusedConnection::new(ConnectReturnCode::NotAuthorized, e.to_string()))?,
            ),
            None => None,
        };
        Ok(Connect {
            client_id: self.client_id,
            protocol_version: self.protocol_version,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            last_will,
            username: self.username,
            password: self.password,
            bridge: self.bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_connect() {
        let c = Connect::builder("c1")
            .keep_alive(30)
            .username("u")
            .password("p")
            .last_will("dev/1/status", "offline", QoS::AtLeastOnce, true)
            .build()
            .unwrap();
        assert_eq!(c.client_id(), "c1");
        assert_eq!(c.protocol_version(), 4);
        assert_eq!(c.keep_alive(), 30);
        assert!(c.clean_session() && !c.is_bridge());

        let will = c.last_will().unwrap().to_retained_message().unwrap();
        assert_eq!(&**will.topic(), "dev/1/status");
        assert_eq!(will.qos(), QoS::AtLeastOnce);
    }

    #[test]
    fn refused() {
        let e = Connect::builder("c1").protocol_version(6).build().unwrap_err();
        assert_eq!(e.return_code, ConnectReturnCode::UnacceptableProtocolVersion);

        let e = Connect::builder("c1").password("p").build().unwrap_err();
        assert_eq!(e.return_code, ConnectReturnCode::BadUsernameOrPassword);

        let e = Connect::builder("c1").last_will("a/+", "x", QoS::AtMostOnce, false).build().unwrap_err();
        assert_eq!(e.return_code, ConnectReturnCode::NotAuthorized);

        let e = Connect::builder("x".repeat(MAX_CLIENT_ID_LEN + 1)).build().unwrap_err();
        assert_eq!(e.return_code, ConnectReturnCode::IdentifierRejected);
        assert!(e.to_string().starts_with("Connection Refused, identifier rejected"));
    }

    #[test]
    fn will_without_retain() {
        let will = LastWill::new("a/b", "bye", QoS::AtMostOnce, false).unwrap();
        assert!(will.to_retained_message().is_none());
        assert_eq!(ConnectReturnCode::ServerUnavailable as u8, 3);
    }
}
