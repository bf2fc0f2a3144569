// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Integration tests for the ingest pipelines
//!
//! These drive whole tiered bodies through decode, inheritance and publish
//! against the in-memory transport and ontology.

use serde_json::json;
use smap_relay::*;

const BUILDING: &str = r#"{
    "/": {"Metadata": {"Site": "Soda Hall", "Location": {"City": "Berkeley"}}},
    "/floor4": {
        "Metadata": {"Floor": "4", "Location": {"City": "Oakland"}},
        "Properties": {"UnitofTime": "ms", "UnitofMeasure": "C"}
    },
    "/floor4/vav410": {"Contents": ["temp", "damper"]},
    "/floor4/vav410/temp": {
        "uuid": "temp-410",
        "Properties": {"UnitofMeasure": "F"},
        "Readings": [[1500000000000, 70.1], [1500000001000, 70.3], []]
    },
    "/floor4/vav410/damper": {
        "uuid": "damper-410",
        "Metadata": {"Floor": "4b"},
        "Readings": [[1500000000000, {"position": 35}]]
    },
    "/floor4/vav410/stats": {
        "uuid": "stats-410",
        "Readings": [[1500000000000, 12, 68.0, 70.0, 72.5]]
    }
}"#;

fn brick() -> MemoryOntology {
    MemoryOntology::new()
        .subclass("Zone_Air_Temperature_Sensor", "Temperature_Sensor")
        .subclass("Temperature_Sensor", "Sensor")
        .subclass("Damper_Position_Command", "Command")
        .subclass("Damper_Position_Command", "Damper")
        .subclass("VAV_With_Reheat", "VAV")
        .point(
            "temp-410",
            "ZNT_410",
            "Zone_Air_Temperature_Sensor",
            "VAV_410",
            "VAV_With_Reheat",
        )
        .point(
            "damper-410",
            "DMPR_410",
            "Damper_Position_Command",
            "VAV_410",
            "VAV_With_Reheat",
        )
        .point("stats-410", "STAT_410", "Mystery", "PANEL_4", "Panel")
}

// ============================================================================
// Inheritance
// ============================================================================

#[test]
fn test_building_collapse() {
    let set = TieredMessageSet::from_slice(BUILDING.as_bytes()).unwrap();
    assert_eq!(set.len(), 6);
    let collapsed = set.collapse_to_timeseries();
    assert_eq!(collapsed.len(), 3);
    assert!(collapsed.iter().all(Message::is_timeseries));

    let temp = collapsed.get("/floor4/vav410/temp").unwrap();
    assert_eq!(temp.metadata["Site"], "Soda Hall");
    assert_eq!(temp.metadata["Location.City"], "Oakland");
    assert_eq!(temp.readings.len(), 2);
    let props = temp.properties.as_ref().unwrap();
    assert_eq!(props.unit_of_measure.as_deref(), Some("F"));
    assert_eq!(props.unit_of_time, Some(UnitOfTime::Milliseconds));
    assert!(temp
        .readings
        .iter()
        .all(|r| r.unit() == UnitOfTime::Milliseconds));

    let damper = collapsed.get("/floor4/vav410/damper").unwrap();
    assert_eq!(damper.metadata["Floor"], "4b");
    assert!(damper.readings[0].is_object());

    let stats = collapsed.get("/floor4/vav410/stats").unwrap();
    assert!(stats.readings[0].is_stats());
}

#[test]
fn test_collapse_is_idempotent() {
    let once = TieredMessageSet::from_slice(BUILDING.as_bytes())
        .unwrap()
        .collapse_to_timeseries();
    let twice = once.clone().collapse_to_timeseries();
    assert_eq!(once, twice);
}

// ============================================================================
// Identity variant
// ============================================================================

#[test]
fn test_identity_publishes_in_reading_order() {
    let transport = MemoryTransport::new();
    let stats = IngestStats::new();
    let config = RelayConfig::default().with_publish_unit(Some(UnitOfTime::Seconds));
    let report =
        ingest_with_identity(&transport, &config, &stats, "vk/smap", BUILDING.as_bytes()).unwrap();

    assert_eq!(report.timeseries, 3);
    assert_eq!(report.published, 4);

    let temp: Vec<_> = transport
        .published()
        .into_iter()
        .filter(|p| p.address == "vk/smap/floor4/vav410/temp")
        .map(|p| p.payload.to_json().unwrap())
        .collect();
    assert_eq!(temp.len(), 2);
    assert_eq!(temp[0]["time"], json!(1_500_000_000u64));
    assert_eq!(temp[1]["time"], json!(1_500_000_001u64));
    assert_eq!(temp[0]["uuid"], "temp-410");

    let stats_payload = transport
        .published()
        .into_iter()
        .find(|p| p.address.ends_with("/stats"))
        .and_then(|p| p.payload.to_json())
        .unwrap();
    assert_eq!(stats_payload["value"]["Count"], json!(12));
}

#[test]
fn test_identity_sets_metadata_per_message() {
    let transport = MemoryTransport::new();
    ingest_with_identity(
        &transport,
        &RelayConfig::default(),
        &IngestStats::new(),
        "vk/smap",
        BUILDING.as_bytes(),
    )
    .unwrap();

    let writes = transport.metadata();
    assert!(writes
        .iter()
        .any(|w| w.address == "vk/smap" && w.key == "Location.City" && w.value == "Berkeley"));
    assert!(writes
        .iter()
        .any(|w| w.address == "vk/smap/floor4" && w.key == "Floor" && w.value == "4"));
    assert!(writes
        .iter()
        .any(|w| w.address == "vk/smap/floor4/vav410/damper" && w.value == "4b"));
    assert_eq!(writes.len(), 5);
}

// ============================================================================
// Ontology variant
// ============================================================================

#[test]
fn test_routed_addresses_by_equipment() {
    let resolver = ClassResolver::new(brick());
    let transport = MemoryTransport::new();
    ingest_routed(
        &resolver,
        &transport,
        &RelayConfig::default(),
        &IngestStats::new(),
        "bldg",
        BUILDING.as_bytes(),
    )
    .unwrap();

    let published = transport.published();
    assert_eq!(published.len(), 4);
    let addresses: Vec<_> = published.iter().map(|p| p.address.as_str()).collect();
    assert_eq!(
        addresses
            .iter()
            .filter(|a| **a == "bldg/s.bms/VAV_410/i.VAV/signal/info")
            .count(),
        3
    );
    // unknown equipment class still delivers
    assert!(addresses.contains(&"bldg/s.bms/PANEL_4/i./signal/info"));

    let bodies: Vec<_> = published
        .iter()
        .filter_map(|p| p.payload.to_json())
        .collect();
    let by_name = |name: &str| bodies.iter().find(|b| b["name"] == name).unwrap();

    // payloads carry canonical categories, not raw ontology classes
    let damper = by_name("DMPR_410");
    assert_eq!(damper["class"], "Damper");
    assert_eq!(damper["equipment_class"], "VAV");
    assert_eq!(damper["value"], json!({"position": 35}));

    let temp = by_name("ZNT_410");
    assert_eq!(temp["class"], "Sensor");
    assert_eq!(temp["equipment"], "VAV_410");

    let stats = by_name("STAT_410");
    assert_eq!(stats["class"], "");
    assert_eq!(stats["equipment_class"], "");
}

#[test]
fn test_resolver_canonical_categories() {
    let resolver = ClassResolver::new(brick());
    let temp = resolver.resolve("temp-410").unwrap();
    assert_eq!(temp.generic_point_class, Some(CanonicalClass::Sensor));
    // Damper precedes Command in the category list
    let damper = resolver.resolve("damper-410").unwrap();
    assert_eq!(damper.generic_point_class, Some(CanonicalClass::Damper));
    let odd = resolver.resolve("stats-410").unwrap();
    assert_eq!(odd.generic_point_class, None);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_overflowing_timestamp_is_surfaced() {
    let body = r#"{"/x": {"uuid": "u", "Properties": {"UnitofTime": "s"}, "Readings": [[18446744073709551, 1]]}}"#;
    let transport = MemoryTransport::new();
    let err = ingest_with_identity(
        &transport,
        &RelayConfig::default(),
        &IngestStats::new(),
        "ns",
        body.as_bytes(),
    )
    .unwrap_err();
    assert!(matches!(err, RelayError::TimeConvert(_)));
    assert!(err.to_string().contains("Over/underflow"));
    assert!(transport.published().is_empty());
}

#[test]
fn test_error_text_is_plain() {
    let transport = MemoryTransport::new();
    let err = ingest_with_identity(
        &transport,
        &RelayConfig::default(),
        &IngestStats::new(),
        "ns",
        br#"{"/x": {"Properties": {"UnitofTime": "fortnights"}}}"#,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Invalid unit fortnights. Must be s,us,ms,ns");
}
