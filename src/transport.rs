// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pub/sub transport abstraction
//!
//! The relay never speaks the bus protocol itself. A [`Transport`] is the
//! publishing side of one live identity; the server crate supplies the real
//! one, tests use [`MemoryTransport`].

use crate::error::TransportError;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Mutex;

/// Encoded payload plus the content tag that tells subscribers how to read it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadObject {
    /// Dotted content tag, e.g. `2.0.9.1`
    pub content_tag: String,
    /// Encoded body
    pub bytes: Vec<u8>,
}

impl PayloadObject {
    /// Encode `value` as a msgpack map under `content_tag`
    pub fn msgpack<T: Serialize>(content_tag: &str, value: &T) -> Result<Self, TransportError> {
        let tree = serde_json::to_value(value).map_err(|e| TransportError::Encode(e.to_string()))?;
        let bytes = rmp_serde::to_vec_named(&Msgpack(&tree))
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(Self {
            content_tag: content_tag.to_string(),
            bytes,
        })
    }

    /// Decode the msgpack body into a JSON value
    pub fn to_json(&self) -> Option<Value> {
        rmp_serde::from_slice(&self.bytes).ok()
    }
}

/// Writes a JSON tree with native msgpack numbers.
///
/// `serde_json::Number` serializes as a private token struct outside
/// serde_json, so numbers are narrowed to u64, i64 or f64 here. Integers
/// wider than 64 bits go out as their decimal text.
struct Msgpack<'a>(&'a Value);

impl Serialize for Msgpack<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    serializer.serialize_u64(u)
                } else if let Some(i) = n.as_i64() {
                    serializer.serialize_i64(i)
                } else if n.to_string().contains(&['.', 'e', 'E'][..]) {
                    match n.as_f64() {
                        Some(f) => serializer.serialize_f64(f),
                        None => serializer.serialize_str(&n.to_string()),
                    }
                } else {
                    serializer.serialize_str(&n.to_string())
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Msgpack(item))?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, item) in map {
                    out.serialize_entry(key, &Msgpack(item))?;
                }
                out.end()
            }
        }
    }
}

/// Publishing side of the bus
pub trait Transport: Send + Sync {
    /// Publish one payload at `address`
    fn publish(&self, address: &str, payload: &PayloadObject) -> Result<(), TransportError>;

    /// Attach a persistent metadata key to `address`
    fn set_metadata(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn publish(&self, address: &str, payload: &PayloadObject) -> Result<(), TransportError> {
        (**self).publish(address, payload)
    }

    fn set_metadata(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError> {
        (**self).set_metadata(address, key, value)
    }
}

/// A publish captured by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Destination address
    pub address: String,
    /// Payload as sent
    pub payload: PayloadObject,
}

/// Metadata write captured by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataWrite {
    /// Destination address
    pub address: String,
    /// Metadata key
    pub key: String,
    /// Metadata value
    pub value: String,
}

#[derive(Debug, Default)]
struct MemoryLog {
    published: Vec<Published>,
    metadata: Vec<MetadataWrite>,
}

/// In-memory transport for tests and dry runs.
///
/// Records every call in order; can be told to fail after a number of
/// successful publishes, or on every metadata write, to exercise
/// partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    log: Mutex<MemoryLog>,
    fail_after: Option<usize>,
    reject_metadata: bool,
}

impl MemoryTransport {
    /// Create a transport that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that rejects every publish after the first `n`
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    /// Create a transport that rejects every metadata write
    pub fn rejecting_metadata() -> Self {
        Self {
            reject_metadata: true,
            ..Self::default()
        }
    }

    /// Publishes recorded so far
    pub fn published(&self) -> Vec<Published> {
        self.log
            .lock()
            .map(|log| log.published.clone())
            .unwrap_or_default()
    }

    /// Metadata writes recorded so far
    pub fn metadata(&self) -> Vec<MetadataWrite> {
        self.log
            .lock()
            .map(|log| log.metadata.clone())
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, address: &str, payload: &PayloadObject) -> Result<(), TransportError> {
        let mut log = self.log.lock().map_err(|_| TransportError::Publish {
            address: address.to_string(),
            reason: "transport lock poisoned".to_string(),
        })?;
        if self.fail_after.is_some_and(|n| log.published.len() >= n) {
            return Err(TransportError::Publish {
                address: address.to_string(),
                reason: "transport rejected publish".to_string(),
            });
        }
        log.published.push(Published {
            address: address.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn set_metadata(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError> {
        let mut log = self.log.lock().map_err(|_| TransportError::Metadata {
            address: address.to_string(),
            key: key.to_string(),
            reason: "transport lock poisoned".to_string(),
        })?;
        if self.reject_metadata {
            return Err(TransportError::Metadata {
                address: address.to_string(),
                key: key.to_string(),
                reason: "transport rejected metadata".to_string(),
            });
        }
        log.metadata.push(MetadataWrite {
            address: address.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}
