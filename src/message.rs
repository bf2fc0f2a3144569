// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! sMAP message model
//!
//! A [`Message`] is one entry of a tiered body: either a collection (no
//! uuid, carries metadata for everything below it) or a timeseries (has a
//! uuid and usually readings).

use crate::error::ParseError;
use crate::reading::Reading;
use crate::time::UnitOfTime;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flat string map used for metadata and actuator descriptions
pub type Dict = BTreeMap<String, String>;

/// Kind of values a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Structured values
    Object,
    /// Numeric values
    Numeric,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Object => f.write_str("object"),
            StreamType::Numeric => f.write_str("numeric"),
        }
    }
}

impl FromStr for StreamType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "object" => Ok(StreamType::Object),
            "numeric" => Ok(StreamType::Numeric),
            other => Err(ParseError::StreamType(other.to_string())),
        }
    }
}

/// Stream properties; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// Unit of the reading timestamps
    pub unit_of_time: Option<UnitOfTime>,
    /// Engineering unit of the values
    pub unit_of_measure: Option<String>,
    /// Value kind
    pub stream_type: Option<StreamType>,
}

impl Properties {
    /// Properties with no field set
    pub const EMPTY: Properties = Properties {
        unit_of_time: None,
        unit_of_measure: None,
        stream_type: None,
    };

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.unit_of_time.is_none() && self.unit_of_measure.is_none() && self.stream_type.is_none()
    }

    /// Copy every field of `other` that is unset here
    pub fn fill_missing(&mut self, other: &Properties) {
        if self.unit_of_time.is_none() {
            self.unit_of_time = other.unit_of_time;
        }
        if self.unit_of_measure.is_none() {
            self.unit_of_measure = other.unit_of_measure.clone();
        }
        if self.stream_type.is_none() {
            self.stream_type = other.stream_type;
        }
    }
}

/// One path's entry in a tiered body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Slash-delimited path, unique within a batch
    pub path: String,
    /// Stream identifier; empty for collections
    pub uuid: String,
    /// Stream properties, `None` when absent or blank
    pub properties: Option<Properties>,
    /// Flattened metadata
    pub metadata: Dict,
    /// Flattened actuator description
    pub actuator: Dict,
    /// Readings in arrival order
    pub readings: Vec<Reading>,
    /// Child paths listed by a collection
    pub contents: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireProperties {
    #[serde(rename = "UnitofTime", alias = "UnitOfTime")]
    unit_of_time: Option<String>,
    #[serde(rename = "UnitofMeasure", alias = "UnitOfMeasure")]
    unit_of_measure: Option<String>,
    #[serde(rename = "StreamType")]
    stream_type: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireMessage {
    #[serde(rename = "uuid", alias = "UUID")]
    uuid: Option<String>,
    #[serde(rename = "Path")]
    path: Option<String>,
    #[serde(rename = "Readings")]
    readings: Option<Vec<Vec<Value>>>,
    #[serde(rename = "Metadata")]
    metadata: Option<Map<String, Value>>,
    #[serde(rename = "Actuator")]
    actuator: Option<Map<String, Value>>,
    #[serde(rename = "Properties")]
    properties: Option<WireProperties>,
    #[serde(rename = "Contents")]
    contents: Option<Vec<String>>,
}

impl Message {
    /// Decode one tiered entry stored under `path`.
    ///
    /// The key in the tiered body wins over any `Path` field in the entry.
    /// Any malformed reading fails the whole message.
    pub fn from_value(path: &str, value: Value) -> Result<Self, ParseError> {
        let wire: WireMessage = serde_json::from_value(value)?;

        let properties = match wire.properties {
            Some(p) => {
                let props = Properties {
                    unit_of_time: p.unit_of_time.as_deref().map(str::parse).transpose()?,
                    unit_of_measure: p.unit_of_measure.filter(|u| !u.is_empty()),
                    stream_type: p.stream_type.as_deref().map(str::parse).transpose()?,
                };
                Some(props).filter(|p| !p.is_empty())
            }
            None => None,
        };

        let path = if path.is_empty() {
            wire.path.unwrap_or_default()
        } else {
            path.to_string()
        };
        let declared = properties.as_ref().and_then(|p| p.unit_of_time);

        let mut readings = Vec::new();
        for entry in wire.readings.unwrap_or_default() {
            if entry.is_empty() {
                continue;
            }
            readings.push(Reading::from_wire(&entry, declared, &path)?);
        }

        Ok(Message {
            uuid: wire.uuid.unwrap_or_default(),
            properties,
            metadata: wire.metadata.map(|m| flatten(&m)).unwrap_or_default(),
            actuator: wire.actuator.map(|m| flatten(&m)).unwrap_or_default(),
            readings,
            contents: wire.contents.unwrap_or_default(),
            path,
        })
    }

    /// True when this entry is a stream
    pub fn is_timeseries(&self) -> bool {
        !self.uuid.is_empty()
    }

    /// True when this entry has anything beyond path, uuid and readings
    pub fn has_metadata(&self) -> bool {
        !self.actuator.is_empty()
            || !self.metadata.is_empty()
            || self.properties.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Set a single dotted field such as `Metadata.Location.Building`.
    ///
    /// Recognized keys are `Metadata.*`, `Actuator.*`, `Path` and `UUID`;
    /// anything else is ignored.
    pub fn add_tag(&mut self, key: &str, value: impl Into<String>) {
        if let Some(field) = key.strip_prefix("Metadata.") {
            self.metadata.insert(field.to_string(), value.into());
        } else if let Some(field) = key.strip_prefix("Actuator.") {
            self.actuator.insert(field.to_string(), value.into());
        } else if key == "Path" {
            self.path = value.into();
        } else if key == "UUID" {
            self.uuid = value.into();
        }
    }

    /// Fill fields this message lacks from an ancestor.
    ///
    /// Keys already present here are never overwritten. A unit of time that
    /// arrives through inheritance also re-tags the readings.
    pub fn inherit_from(&mut self, ancestor: &Message) {
        for (k, v) in &ancestor.metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &ancestor.actuator {
            self.actuator.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if let Some(theirs) = ancestor.properties.as_ref().filter(|p| !p.is_empty()) {
            let ours = self.properties.get_or_insert_with(Properties::default);
            let had_unit = ours.unit_of_time.is_some();
            ours.fill_missing(theirs);
            if let (false, Some(unit)) = (had_unit, ours.unit_of_time) {
                for reading in &mut self.readings {
                    reading.set_unit(unit);
                }
            }
        }
    }
}

/// Flatten nested objects into dotted keys: `{"a":{"b":1}}` becomes `{"a.b":"1"}`.
///
/// Non-string leaves are rendered as JSON text. Keys are visited in sorted
/// order, so when a literal dotted key collides with a nested one the key
/// visited last wins, the same way every time.
pub fn flatten(map: &Map<String, Value>) -> Dict {
    let mut out = Dict::new();
    flatten_into(&mut out, None, map);
    out
}

fn flatten_into(out: &mut Dict, prefix: Option<&str>, map: &Map<String, Value>) {
    for (k, v) in map {
        let key = match prefix {
            Some(p) => format!("{}.{}", p, k),
            None => k.clone(),
        };
        match v {
            Value::Object(inner) => flatten_into(out, Some(key.as_str()), inner),
            Value::String(s) => {
                out.insert(key, s.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_flatten_nested() {
        let flat = flatten(&obj(json!({"a": {"b": 1, "c": {"d": 2}}})));
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["a.b"], "1");
        assert_eq!(flat["a.c.d"], "2");
    }

    #[test]
    fn test_flatten_keeps_strings_verbatim() {
        let flat = flatten(&obj(json!({"Location": {"Building": "Soda Hall"}})));
        assert_eq!(flat["Location.Building"], "Soda Hall");
    }

    #[test]
    fn test_flatten_collision_is_stable() {
        let input = obj(json!({"a": {"b": "nested"}, "a.b": "literal"}));
        let first = flatten(&input);
        for _ in 0..10 {
            assert_eq!(flatten(&input), first);
        }
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_parse_timeseries() {
        let msg = Message::from_value(
            "/building/temp",
            json!({
                "uuid": "abc",
                "Readings": [[1500000000, 21.0], [], [1500000001, 21.5]],
                "Metadata": {"Location": {"Room": "410"}},
                "Properties": {"UnitofTime": "s", "UnitofMeasure": "C", "StreamType": "numeric"}
            }),
        )
        .unwrap();
        assert_eq!(msg.path, "/building/temp");
        assert!(msg.is_timeseries());
        assert!(msg.has_metadata());
        assert_eq!(msg.readings.len(), 2);
        assert_eq!(msg.metadata["Location.Room"], "410");
        let props = msg.properties.unwrap();
        assert_eq!(props.unit_of_time, Some(UnitOfTime::Seconds));
        assert_eq!(props.unit_of_measure.as_deref(), Some("C"));
        assert_eq!(props.stream_type, Some(StreamType::Numeric));
    }

    #[test]
    fn test_parse_collection() {
        let msg = Message::from_value(
            "/building",
            json!({"Contents": ["temp"], "Metadata": {"Site": "Berkeley"}}),
        )
        .unwrap();
        assert!(!msg.is_timeseries());
        assert!(msg.has_metadata());
        assert_eq!(msg.contents, vec!["temp".to_string()]);
    }

    #[test]
    fn test_blank_properties_are_dropped() {
        let msg = Message::from_value("/x", json!({"uuid": "u", "Properties": {}})).unwrap();
        assert!(msg.properties.is_none());
        assert!(!msg.has_metadata());
    }

    #[test]
    fn test_properties_alias_spelling() {
        let msg = Message::from_value(
            "/x",
            json!({"uuid": "u", "Properties": {"UnitOfTime": "ms"}, "Readings": [[1500000000, 1]]}),
        )
        .unwrap();
        assert_eq!(msg.readings[0].unit(), UnitOfTime::Milliseconds);
    }

    #[test]
    fn test_invalid_properties() {
        let err = Message::from_value("/x", json!({"Properties": {"UnitofTime": "weeks"}}))
            .unwrap_err();
        assert!(matches!(err, ParseError::UnitOfTime(_)));

        let err = Message::from_value("/x", json!({"Properties": {"StreamType": "blob"}}))
            .unwrap_err();
        assert!(matches!(err, ParseError::StreamType(_)));
    }

    #[test]
    fn test_bad_reading_fails_message() {
        let err = Message::from_value(
            "/x",
            json!({"uuid": "u", "Readings": [[1, 2], [{"t": 1}, 3]]}),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Timestamp { .. }));
    }

    #[test]
    fn test_add_tag() {
        let mut msg = Message::default();
        msg.add_tag("Metadata.Location.Room", "410");
        msg.add_tag("Actuator.Model", "binary");
        msg.add_tag("Path", "/a/b");
        msg.add_tag("UUID", "u1");
        msg.add_tag("Bogus.Key", "ignored");

        assert_eq!(msg.metadata["Location.Room"], "410");
        assert_eq!(msg.actuator["Model"], "binary");
        assert_eq!(msg.path, "/a/b");
        assert_eq!(msg.uuid, "u1");
        assert_eq!(msg.metadata.len(), 1);
        assert_eq!(msg.actuator.len(), 1);
    }

    #[test]
    fn test_inherit_fills_only_missing() {
        let mut leaf = Message {
            uuid: "u".to_string(),
            properties: Some(Properties {
                unit_of_measure: Some("F".to_string()),
                ..Properties::EMPTY
            }),
            ..Default::default()
        };
        leaf.add_tag("Metadata.x", "leaf");

        let mut parent = Message {
            properties: Some(Properties {
                unit_of_time: Some(UnitOfTime::Milliseconds),
                unit_of_measure: Some("C".to_string()),
                stream_type: Some(StreamType::Numeric),
            }),
            ..Default::default()
        };
        parent.add_tag("Metadata.x", "parent");
        parent.add_tag("Metadata.y", "parent");

        leaf.inherit_from(&parent);
        assert_eq!(leaf.metadata["x"], "leaf");
        assert_eq!(leaf.metadata["y"], "parent");
        let props = leaf.properties.unwrap();
        assert_eq!(props.unit_of_measure.as_deref(), Some("F"));
        assert_eq!(props.unit_of_time, Some(UnitOfTime::Milliseconds));
        assert_eq!(props.stream_type, Some(StreamType::Numeric));
    }

    #[test]
    fn test_inherited_unit_retags_readings() {
        let mut leaf =
            Message::from_value("/a/b", json!({"uuid": "u", "Readings": [[1500000000, 1]]}))
                .unwrap();
        assert_eq!(leaf.readings[0].unit(), UnitOfTime::Seconds);
        let parent =
            Message::from_value("/a", json!({"Properties": {"UnitofTime": "ms"}})).unwrap();
        leaf.inherit_from(&parent);
        assert_eq!(leaf.readings[0].unit(), UnitOfTime::Milliseconds);
    }
}
