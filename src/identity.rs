// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Publishing identities
//!
//! Credentials are opaque to the relay: a leading type tag plus a payload
//! that only the [`IdentityFactory`] understands. The factory derives the
//! verifying key and turns a credential into a live [`Transport`].

use crate::error::IdentityError;
use crate::transport::Transport;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::fmt;

/// Public half of a credential, as raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerifyingKey(Vec<u8>);

impl VerifyingKey {
    /// Wrap raw key bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode the string form produced by [`VerifyingKey::encode`]
    pub fn decode(encoded: &str) -> Result<Self, IdentityError> {
        URL_SAFE
            .decode(encoded)
            .map(Self)
            .map_err(|e| IdentityError::Malformed(e.to_string()))
    }

    /// Raw key bytes, as used for the store key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// URL-safe base64 (padded), the form used in request paths and logs
    pub fn encode(&self) -> String {
        URL_SAFE.encode(&self.0)
    }
}

impl fmt::Display for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Credential bytes split into type tag and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCredential {
    /// Leading type byte
    pub type_tag: u8,
    /// Everything after the type byte
    pub payload: Vec<u8>,
}

impl RawCredential {
    /// Split self-describing credential bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, IdentityError> {
        let (type_tag, payload) = bytes.split_first().ok_or(IdentityError::Empty)?;
        Ok(Self {
            type_tag: *type_tag,
            payload: payload.to_vec(),
        })
    }
}

/// Builds live identities from stored credentials
pub trait IdentityFactory: Send + Sync {
    /// Live handle able to publish as this identity
    type Identity: Transport + 'static;

    /// Derive the verifying key without bringing anything up
    fn verifying_key(&self, type_tag: u8, payload: &[u8]) -> Result<VerifyingKey, IdentityError>;

    /// Bring the identity up; returns the handle and the key it reports
    fn create(
        &self,
        type_tag: u8,
        payload: &[u8],
    ) -> Result<(Self::Identity, VerifyingKey), IdentityError>;
}
