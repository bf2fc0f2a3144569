// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ingest pipelines
//!
//! Both pipelines decode a tiered body, collapse it to enriched timeseries
//! and publish one payload per reading, in array order. The first failure
//! aborts the rest of the request; anything already published stays
//! published.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::ontology::{ClassResolver, Ontology};
use crate::router::{build_uri, ontology_address, PointReading, TimeseriesReading};
use crate::tiered::TieredMessageSet;
use crate::transport::{PayloadObject, Transport};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every request, read and reset by the stats ticker
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    metadata: AtomicU64,
    readings: AtomicU64,
}

/// Counter values taken by [`IngestStats::take`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages decoded
    pub received: u64,
    /// Metadata keys seen
    pub metadata: u64,
    /// Readings published
    pub readings: u64,
}

impl IngestStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &IngestReport) {
        self.received.fetch_add(report.messages as u64, Ordering::Relaxed);
        self.metadata.fetch_add(report.metadata as u64, Ordering::Relaxed);
        self.readings.fetch_add(report.published as u64, Ordering::Relaxed);
    }

    /// Read and zero every counter
    pub fn take(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.swap(0, Ordering::Relaxed),
            metadata: self.metadata.swap(0, Ordering::Relaxed),
            readings: self.readings.swap(0, Ordering::Relaxed),
        }
    }
}

/// What one request did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Messages in the decoded body
    pub messages: usize,
    /// Metadata keys in the decoded body
    pub metadata: usize,
    /// Timeseries left after collapse
    pub timeseries: usize,
    /// Payloads published
    pub published: usize,
}

impl IngestReport {
    fn begin(set: &TieredMessageSet) -> Self {
        Self {
            messages: set.len(),
            metadata: set.metadata_count(),
            ..Self::default()
        }
    }
}

/// Publish a body as one identity, addressing by sMAP path under `base`.
///
/// Every metadata key of every message is written with `set_metadata`
/// before any reading goes out.
pub fn ingest_with_identity<T: Transport + ?Sized>(
    transport: &T,
    config: &RelayConfig,
    stats: &IngestStats,
    base: &str,
    body: &[u8],
) -> Result<IngestReport> {
    let set = TieredMessageSet::from_slice(body)?;
    let mut report = IngestReport::begin(&set);
    let result = publish_with_identity(transport, config, base, set, &mut report);
    stats.record(&report);
    result.map(|_| report)
}

fn publish_with_identity<T: Transport + ?Sized>(
    transport: &T,
    config: &RelayConfig,
    base: &str,
    set: TieredMessageSet,
    report: &mut IngestReport,
) -> Result<()> {
    for message in set.iter() {
        let address = build_uri(base, &message.path);
        for (key, value) in &message.metadata {
            transport.set_metadata(&address, key, value)?;
        }
    }

    let collapsed = set.collapse_to_timeseries();
    report.timeseries = collapsed.len();
    for message in collapsed {
        let address = build_uri(base, &message.path);
        for reading in &message.readings {
            let body = TimeseriesReading::new(&message.uuid, reading, config.publish_unit)?;
            let po = PayloadObject::msgpack(&config.timeseries_content_tag, &body)?;
            transport.publish(&address, &po)?;
            report.published += 1;
        }
    }
    Ok(())
}

/// Publish a body with addresses resolved through the ontology.
///
/// Each timeseries is resolved once; a point the ontology does not know
/// aborts the request.
pub fn ingest_routed<O: Ontology, T: Transport + ?Sized>(
    resolver: &ClassResolver<O>,
    transport: &T,
    config: &RelayConfig,
    stats: &IngestStats,
    base: &str,
    body: &[u8],
) -> Result<IngestReport> {
    let set = TieredMessageSet::from_slice(body)?;
    let mut report = IngestReport::begin(&set);
    let result = publish_routed(resolver, transport, config, base, set, &mut report);
    stats.record(&report);
    result.map(|_| report)
}

fn publish_routed<O: Ontology, T: Transport + ?Sized>(
    resolver: &ClassResolver<O>,
    transport: &T,
    config: &RelayConfig,
    base: &str,
    set: TieredMessageSet,
    report: &mut IngestReport,
) -> Result<()> {
    let collapsed = set.collapse_to_timeseries();
    report.timeseries = collapsed.len();
    for message in collapsed {
        if message.readings.is_empty() {
            continue;
        }
        let resolution = resolver.resolve(&message.uuid)?;
        let address = ontology_address(base, &resolution);
        debug!("{} -> {}", message.uuid, address);
        for reading in &message.readings {
            let body = PointReading::new(&resolution, reading, config.publish_unit)?;
            let po = PayloadObject::msgpack(&config.point_content_tag, &body)?;
            transport.publish(&address, &po)?;
            report.published += 1;
        }
    }
    Ok(())
}
