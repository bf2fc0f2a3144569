// smap-relay server - HTTP front end for the relay
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the relay.
//!
//! This module defines all Prometheus metrics exposed by the server
//! and the helpers the handlers call to update them.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use smap_relay::IngestReport;

lazy_static! {
    // ============================================================
    // Ingest
    // ============================================================

    /// Ingest requests by outcome (`ok`, `error`).
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "smap_relay_requests_total",
        "Ingest requests handled, by outcome",
        &["outcome"]
    ).unwrap();

    /// Tiered messages decoded.
    pub static ref MESSAGES_TOTAL: IntCounter = register_int_counter!(
        "smap_relay_messages_total",
        "Tiered messages decoded"
    ).unwrap();

    /// Metadata keys seen.
    pub static ref METADATA_TOTAL: IntCounter = register_int_counter!(
        "smap_relay_metadata_total",
        "Metadata keys decoded"
    ).unwrap();

    /// Readings published onto the bus.
    pub static ref READINGS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        "smap_relay_readings_published_total",
        "Readings published"
    ).unwrap();

    // ============================================================
    // Credential store
    // ============================================================

    /// Reload steps by phase (`drain`, `resume`).
    pub static ref RELOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "smap_relay_reloads_total",
        "Credential store reload steps, by phase",
        &["phase"]
    ).unwrap();

    /// Live identities in the cache.
    pub static ref IDENTITIES_LOADED: IntGauge = register_int_gauge!(
        "smap_relay_identities_loaded",
        "Live identities currently cached"
    ).unwrap();
}

/// Record a finished ingest request.
pub fn record_ingest(report: Option<&IngestReport>) {
    match report {
        Some(report) => {
            REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
            MESSAGES_TOTAL.inc_by(report.messages as u64);
            METADATA_TOTAL.inc_by(report.metadata as u64);
            READINGS_PUBLISHED_TOTAL.inc_by(report.published as u64);
        }
        None => REQUESTS_TOTAL.with_label_values(&["error"]).inc(),
    }
}

/// Record one reload step and the cache size after it.
pub fn record_reload(phase: &str, identities: usize) {
    RELOADS_TOTAL.with_label_values(&[phase]).inc();
    IDENTITIES_LOADED.set(identities as i64);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Could not encode metrics: {}", err);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
