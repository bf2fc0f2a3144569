// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Server error types

use smap_relay::{RelayError, StoreError};
use thiserror::Error;

/// Errors that stop a server command
#[derive(Error, Debug)]
pub enum ServerError {
    /// Filesystem or socket failure
    #[error("I/O error on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Credential store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Relay failure outside a request
    #[error("{0}")]
    Relay(#[from] RelayError),

    /// Call to a running server or collaborator failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid command line combination
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServerError {
    /// Wrap an I/O error with what was being done
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ServerError::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::Http(err.to_string())
    }
}
