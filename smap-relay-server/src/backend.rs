// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Concrete collaborators
//!
//! - [`Ed25519IdentityFactory`] turns stored credentials into signing identities
//! - [`BrokerIdentity`] signs payloads and hands them to the broker over HTTP
//! - [`HttpOntology`] forwards queries to an ontology service
//!
//! All HTTP here is blocking; callers run it on the blocking pool.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use smap_relay::{
    IdentityError, IdentityFactory, Ontology, PayloadObject, QueryRow, ResolveError, Transport,
    TransportError, VerifyingKey,
};
use std::time::Duration;
use tracing::debug;

/// Type tag of Ed25519 credentials
pub const ED25519_TAG: u8 = 0x32;

const SEED_LEN: usize = 32;
const KEY_LEN: usize = 32;

/// Broker endpoint shared by every identity
#[derive(Clone)]
pub struct Broker {
    client: Client,
    url: String,
}

impl Broker {
    /// Connect to the broker at `url`
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    fn post<T: Serialize>(&self, route: &str, body: &T) -> Result<(), String> {
        self.client
            .post(format!("{}/{}", self.url, route))
            .json(body)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Builds [`BrokerIdentity`] handles from Ed25519 credentials.
///
/// Payload layout: 32-byte seed, optionally followed by the 32-byte
/// verifying key, which must then match the seed.
#[derive(Clone, Default)]
pub struct Ed25519IdentityFactory {
    broker: Option<Broker>,
}

impl Ed25519IdentityFactory {
    /// Factory whose identities publish through `broker`
    pub fn new(broker: Broker) -> Self {
        Self {
            broker: Some(broker),
        }
    }

    /// Factory whose identities only log what they would publish
    pub fn dry_run() -> Self {
        Self::default()
    }

    fn signing_key(&self, type_tag: u8, payload: &[u8]) -> Result<SigningKey, IdentityError> {
        if type_tag != ED25519_TAG {
            return Err(IdentityError::UnsupportedType(type_tag));
        }
        if payload.len() != SEED_LEN && payload.len() != SEED_LEN + KEY_LEN {
            return Err(IdentityError::Malformed(format!(
                "expected {} or {} bytes, got {}",
                SEED_LEN,
                SEED_LEN + KEY_LEN,
                payload.len()
            )));
        }
        let seed: [u8; SEED_LEN] = payload[..SEED_LEN]
            .try_into()
            .map_err(|_| IdentityError::Malformed("bad seed".to_string()))?;
        let signing_key = SigningKey::from_bytes(&seed);
        if let Some(declared) = payload.get(SEED_LEN..).filter(|k| !k.is_empty()) {
            if declared != signing_key.verifying_key().as_bytes() {
                return Err(IdentityError::Malformed(
                    "declared key does not match seed".to_string(),
                ));
            }
        }
        Ok(signing_key)
    }
}

impl IdentityFactory for Ed25519IdentityFactory {
    type Identity = BrokerIdentity;

    fn verifying_key(&self, type_tag: u8, payload: &[u8]) -> Result<VerifyingKey, IdentityError> {
        let signing_key = self.signing_key(type_tag, payload)?;
        Ok(VerifyingKey::new(signing_key.verifying_key().to_bytes().to_vec()))
    }

    fn create(
        &self,
        type_tag: u8,
        payload: &[u8],
    ) -> Result<(BrokerIdentity, VerifyingKey), IdentityError> {
        let signing_key = self.signing_key(type_tag, payload)?;
        let vk = VerifyingKey::new(signing_key.verifying_key().to_bytes().to_vec());
        let identity = BrokerIdentity {
            signing_key,
            vk: vk.encode(),
            broker: self.broker.clone(),
        };
        Ok((identity, vk))
    }
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    vk: &'a str,
    address: &'a str,
    content_tag: &'a str,
    payload: String,
    signature: String,
}

#[derive(Serialize)]
struct MetadataRequest<'a> {
    vk: &'a str,
    address: &'a str,
    key: &'a str,
    value: &'a str,
    signature: String,
}

/// A live signing identity
pub struct BrokerIdentity {
    signing_key: SigningKey,
    vk: String,
    broker: Option<Broker>,
}

impl BrokerIdentity {
    /// Encoded verifying key
    pub fn vk(&self) -> &str {
        &self.vk
    }

    /// Sign the NUL-joined parts, base64 encoded
    fn sign_parts(&self, parts: &[&[u8]]) -> String {
        let message = parts.join(&0u8);
        STANDARD.encode(self.signing_key.sign(&message).to_bytes())
    }
}

impl Transport for BrokerIdentity {
    fn publish(&self, address: &str, payload: &PayloadObject) -> Result<(), TransportError> {
        let signature = self.sign_parts(&[
            address.as_bytes(),
            payload.content_tag.as_bytes(),
            payload.bytes.as_slice(),
        ]);
        let Some(broker) = &self.broker else {
            debug!(
                "dry run: {} publishes {} bytes ({}) to {}",
                self.vk,
                payload.bytes.len(),
                payload.content_tag,
                address
            );
            return Ok(());
        };
        let request = PublishRequest {
            vk: &self.vk,
            address,
            content_tag: &payload.content_tag,
            payload: STANDARD.encode(&payload.bytes),
            signature,
        };
        broker
            .post("publish", &request)
            .map_err(|reason| TransportError::Publish {
                address: address.to_string(),
                reason,
            })
    }

    fn set_metadata(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError> {
        let signature = self.sign_parts(&[address.as_bytes(), key.as_bytes(), value.as_bytes()]);
        let Some(broker) = &self.broker else {
            debug!("dry run: {} sets {}={} on {}", self.vk, key, value, address);
            return Ok(());
        };
        let request = MetadataRequest {
            vk: &self.vk,
            address,
            key,
            value,
            signature,
        };
        broker
            .post("metadata", &request)
            .map_err(|reason| TransportError::Metadata {
                address: address.to_string(),
                key: key.to_string(),
                reason,
            })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<QueryRow>,
}

/// Ontology service reached over HTTP.
///
/// Queries are POSTed as text to `{url}/query`; the service answers with
/// `{"rows": [{"?var": "value", ...}, ...]}`.
pub struct HttpOntology {
    client: Client,
    url: String,
}

impl HttpOntology {
    /// Client for the service at `url`
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

impl Ontology for HttpOntology {
    fn query(&self, query: &str) -> Result<Vec<QueryRow>, ResolveError> {
        let response: QueryResponse = self
            .client
            .post(format!("{}/query", self.url))
            .header("Content-Type", "text/plain")
            .body(query.to_string())
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json())
            .map_err(|e| ResolveError::Query(e.to_string()))?;
        Ok(response.rows)
    }
}
