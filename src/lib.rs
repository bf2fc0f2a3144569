//! # smap-relay - sMAP to pub/sub translation bridge
//!
//! Takes tiered sMAP JSON from building sensors, collapses the metadata
//! hierarchy onto each timeseries and republishes every reading on a
//! capability-secured pub/sub bus.
//!
//! ## Key Features
//!
//! - **Tiered ingest**: path-keyed batches with nearest-ancestor metadata inheritance
//! - **Time normalization**: unit guessing and overflow-checked conversion
//! - **Ontology routing**: point and equipment classes mapped to canonical categories
//! - **Credential store**: durable identities with two-phase hot reload
//!
//! ## Quick Start
//!
//! ```rust
//! use smap_relay::{ingest_with_identity, IngestStats, MemoryTransport, RelayConfig};
//!
//! let body = br#"{
//!     "/": {"Metadata": {"Site": "Soda"}},
//!     "/temp": {"uuid": "u1", "Readings": [[1500000000, 21.5]]}
//! }"#;
//!
//! let transport = MemoryTransport::new();
//! let report = ingest_with_identity(
//!     &transport,
//!     &RelayConfig::default(),
//!     &IngestStats::new(),
//!     "ns/smap",
//!     body,
//! )
//! .unwrap();
//!
//! assert_eq!(report.published, 1);
//! assert_eq!(transport.published()[0].address, "ns/smap/temp");
//! ```
//!
//! ## Modules
//!
//! - [`time`]: Units of time, guessing and conversion
//! - [`reading`]: Typed readings
//! - [`message`]: Message model and field flattening
//! - [`tiered`]: Batches and metadata inheritance
//! - [`ontology`]: Class resolution
//! - [`router`]: Addresses and payloads
//! - [`transport`]: Pub/sub abstraction
//! - [`identity`]: Credentials and the identity factory seam
//! - [`store`]: Credential store and reload state machine
//! - [`ingest`]: The two request pipelines

// Modules
pub mod config;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod message;
pub mod ontology;
pub mod reading;
pub mod router;
pub mod store;
pub mod tiered;
pub mod time;
pub mod transport;

// Re-exports for convenient access
pub use config::RelayConfig;
pub use error::{
    IdentityError, ParseError, RelayError, ResolveError, Result, StoreError, TimeConvertError,
    TransportError,
};
pub use identity::{IdentityFactory, RawCredential, VerifyingKey};
pub use ingest::{ingest_routed, ingest_with_identity, IngestReport, IngestStats, StatsSnapshot};
pub use message::{Dict, Message, Properties, StreamType};
pub use ontology::{CanonicalClass, ClassResolver, MemoryOntology, Ontology, QueryRow, Resolution};
pub use reading::Reading;
pub use router::{build_uri, ontology_address, PointReading, TimeseriesReading};
pub use store::{write_credential, CredentialStore, LoadReport, StoreState};
pub use tiered::{path_prefixes, TieredMessageSet};
pub use time::{convert, UnitOfTime};
pub use transport::{MemoryTransport, PayloadObject, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
