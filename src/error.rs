//! Error types for smap-relay
//!
//! This module defines all error types used throughout the library.
//! Request-scoped errors ([`ParseError`], [`TimeConvertError`],
//! [`ResolveError`], [`TransportError`]) abort the request that raised them;
//! [`StoreError::Corruption`] is only ever logged per record.

use crate::time::UnitOfTime;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for relay operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Malformed body, message or reading
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Timestamp could not be converted without overflow
    #[error("{0}")]
    TimeConvert(#[from] TimeConvertError),

    /// Ontology lookup failed
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// Publish or metadata write failed
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Credential store failure
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Credential bytes could not be turned into an identity
    #[error("{0}")]
    Identity(#[from] IdentityError),

    /// No live identity is cached for the requested key
    #[error("No client found for vk {0}")]
    UnknownIdentity(String),
}

/// Errors while decoding a tiered body
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Body is not valid JSON or does not have the tiered shape
    #[error("Invalid JSON: {0}")]
    Json(String),

    /// A reading entry is not a `[time, value]` pair
    #[error("Malformed reading in {path}: {reason}")]
    Reading { path: String, reason: String },

    /// Time field is neither an unsigned integer nor a float
    #[error("Invalid timestamp in {path}: {raw}")]
    Timestamp { path: String, raw: String },

    /// Unit of time is not one of s, ms, us, ns (or an alias)
    #[error("Invalid unit {0}. Must be s,us,ms,ns")]
    UnitOfTime(String),

    /// Relative duration unit is unknown
    #[error("Invalid unit {0}. Must be h,m,s,us,ms,ns,d")]
    Duration(String),

    /// Stream type is not `numeric` or `object`
    #[error("{0} is not a valid StreamType")]
    StreamType(String),

    /// A numeric field could not be read
    #[error("Invalid number: {0}")]
    Number(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json(err.to_string())
    }
}

/// Over/underflow while converting a timestamp between units.
///
/// Carries the unconverted input so callers can still report it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Over/underflow error in converting time {time} from {from} to {to}")]
pub struct TimeConvertError {
    /// Input timestamp, returned unchanged
    pub time: u64,
    /// Source unit
    pub from: UnitOfTime,
    /// Target unit
    pub to: UnitOfTime,
}

/// Errors from the ontology oracle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// The point query returned no rows
    #[error("No results for point {uuid}")]
    NotFound { uuid: String },

    /// A row is missing one of the selected variables
    #[error("Query result is missing {variable}")]
    MissingVariable { variable: String },

    /// The oracle itself failed
    #[error("Query failed: {0}")]
    Query(String),
}

/// Errors from the pub/sub transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Publish rejected or failed
    #[error("Publish to {address} failed: {reason}")]
    Publish { address: String, reason: String },

    /// Set-metadata rejected or failed
    #[error("Setting metadata {key} on {address} failed: {reason}")]
    Metadata {
        address: String,
        key: String,
        reason: String,
    },

    /// Payload could not be encoded
    #[error("Could not encode payload: {0}")]
    Encode(String),
}

/// Errors from the external identity factory
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    /// Credential file had no bytes at all
    #[error("Credential is empty")]
    Empty,

    /// Leading type tag is not understood by the factory
    #[error("Unsupported credential type 0x{0:02x}")]
    UnsupportedType(u8),

    /// Payload is malformed for its type
    #[error("Could not parse entity: {0}")]
    Malformed(String),
}

/// Errors from the credential store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Durable engine failure
    #[error("Database error: {0}")]
    Database(String),

    /// Stored key does not match the key the factory derived
    #[error("Retrieved vk {stored} did not match vk from factory {derived}")]
    Corruption { stored: String, derived: String },

    /// Reload signal arrived in a state that cannot accept it
    #[error("Cannot {action} while store is {state}")]
    InvalidTransition { state: String, action: String },

    /// A thread panicked while holding a store lock
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// Credential could not be parsed
    #[error("{0}")]
    Identity(#[from] IdentityError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::UnknownIdentity("abc=".to_string());
        assert_eq!(err.to_string(), "No client found for vk abc=");

        let err = TimeConvertError {
            time: u64::MAX,
            from: UnitOfTime::Seconds,
            to: UnitOfTime::Nanoseconds,
        };
        let msg = err.to_string();
        assert!(msg.contains("Over/underflow"));
        assert!(msg.contains("from s to ns"));
    }

    #[test]
    fn test_error_conversion() {
        let not_found = ResolveError::NotFound {
            uuid: "u1".to_string(),
        };
        let relay: RelayError = not_found.into();
        assert!(matches!(relay, RelayError::Resolve(ResolveError::NotFound { .. })));

        let store: StoreError = IdentityError::Empty.into();
        let relay: RelayError = store.into();
        assert_eq!(relay.to_string(), "Credential is empty");
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let parse: ParseError = err.into();
        assert!(parse.to_string().starts_with("Invalid JSON"));
    }
}
