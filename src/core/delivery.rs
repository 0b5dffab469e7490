// src/core/delivery.rs

//! A message pushed by the backend to a subscribed connection.

use crate::core::BridgeError;
use bytes::Bytes;
use serde::{Serialize, Serializer};

/// A single message received from the backend.
///
/// `pattern` is set only when the message arrived through a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub channel: String,
    #[serde(serialize_with = "empty_if_none")]
    pub pattern: Option<String>,
    pub payload: String,
}

impl Delivery {
    pub fn message(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            payload: payload.into(),
        }
    }

    pub fn pmessage(
        pattern: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            pattern: Some(pattern.into()),
            payload: payload.into(),
        }
    }

    /// Serializes the delivery into one outbound frame:
    /// `{"channel":"...","pattern":"...","payload":"..."}`.
    pub fn to_wire(&self) -> Result<Bytes, BridgeError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

// Clients expect the key to be present even for plain channel messages.
fn empty_if_none<S: Serializer>(pattern: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(pattern.as_deref().unwrap_or(""))
}
