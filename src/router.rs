// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Addresses and payloads
//!
//! Two addressing schemes exist. The identity variant republishes under the
//! sMAP path itself; the ontology variant addresses by owning equipment and
//! its canonical class.

use crate::error::RelayError;
use crate::ontology::{CanonicalClass, Resolution};
use crate::reading::Reading;
use crate::time::UnitOfTime;
use serde::Serialize;
use serde_json::Value;

/// Join `base` and `path`, collapsing `//` and dropping a trailing `/`
pub fn build_uri(base: &str, path: &str) -> String {
    let mut uri = format!("{}/{}", base, path);
    while uri.contains("//") {
        uri = uri.replace("//", "/");
    }
    if uri.len() > 1 && uri.ends_with('/') {
        uri.pop();
    }
    uri
}

/// `{base}/s.bms/{equipment}/i.{class}/signal/info`.
///
/// An equipment without a canonical class leaves the interface segment as
/// a bare `i.` rather than blocking delivery.
pub fn ontology_address(base: &str, resolution: &Resolution) -> String {
    let class = resolution
        .generic_equipment_class
        .map(|c| c.as_str())
        .unwrap_or("");
    format!(
        "{}/s.bms/{}/i.{}/signal/info",
        base.trim_end_matches('/'),
        resolution.equipment,
        class
    )
}

/// Timestamp as published: converted to `unit`, or raw when `unit` is `None`
pub fn publish_time(reading: &Reading, unit: Option<UnitOfTime>) -> Result<u64, RelayError> {
    match unit {
        Some(unit) => Ok(reading.converted_time(unit)?),
        None => Ok(reading.time()),
    }
}

fn canonical_name(class: Option<CanonicalClass>) -> String {
    class.map(CanonicalClass::as_str).unwrap_or("").to_string()
}

/// Identity-variant payload body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesReading {
    pub uuid: String,
    pub time: u64,
    pub value: Value,
}

impl TimeseriesReading {
    /// Build from a stream id and one of its readings
    pub fn new(uuid: &str, reading: &Reading, unit: Option<UnitOfTime>) -> Result<Self, RelayError> {
        Ok(Self {
            uuid: uuid.to_string(),
            time: publish_time(reading, unit)?,
            value: reading.value(),
        })
    }
}

/// Ontology-variant payload body.
///
/// `class` and `equipment_class` carry canonical categories; either is empty
/// when the raw class falls under none of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointReading {
    pub name: String,
    pub class: String,
    pub equipment: String,
    pub equipment_class: String,
    pub time: u64,
    pub value: Value,
}

impl PointReading {
    /// Build from a resolved point and one of its readings
    pub fn new(
        resolution: &Resolution,
        reading: &Reading,
        unit: Option<UnitOfTime>,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            name: resolution.point.clone(),
            class: canonical_name(resolution.generic_point_class),
            equipment: resolution.equipment.clone(),
            equipment_class: canonical_name(resolution.generic_equipment_class),
            time: publish_time(reading, unit)?,
            value: reading.value(),
        })
    }
}
