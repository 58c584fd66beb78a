use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;

/// Wire-format envelope exchanged between the host and a worker.
///
/// Payloads are serialized with MessagePack. The `topic` selects the payload
/// type (see [`topics`](crate::messages::topics)); `correlation_id` ties a
/// task result back to the assignment that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "raw_bytes")]
    pub payload: Vec<u8>,

    pub timestamp: DateTime<Utc>,

    pub correlation_id: Uuid,

    /// Protocol version. Envelopes without it are treated as version 1.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl Message {
    /// Create a message with a fresh correlation id.
    pub fn new<T: Serialize>(topic: impl Into<String>, payload: &T) -> Result<Self, PoolError> {
        Self::with_correlation(topic, payload, Uuid::new_v4())
    }

    /// Create a message answering (or continuing) an earlier one.
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, PoolError> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec_named(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            version: 1,
        })
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, PoolError> {
        Ok(rmp_serde::from_slice(&self.payload)?)
    }

    /// Decode the payload after checking the topic matches `topic`.
    pub fn decode_topic<T: for<'de> Deserialize<'de>>(&self, topic: &str) -> Result<T, PoolError> {
        if self.topic != topic {
            return Err(PoolError::UnexpectedTopic(self.topic.clone()));
        }
        self.decode()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PoolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PoolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Serialize `Vec<u8>` as a MessagePack bin rather than an array of ints.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
