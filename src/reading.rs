// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed sensor readings
//!
//! A reading arrives as a JSON array whose first element is the timestamp.
//! The remaining elements decide the kind: a number, any other JSON value, or
//! the five-element statistics form `[time, count, min, mean, max]`.

use crate::error::{ParseError, TimeConvertError};
use crate::time::{convert, UnitOfTime};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::{json, Number, Value};

/// One timestamped reading, always tagged with the unit of its timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Plain numeric sample
    Number {
        time: u64,
        unit: UnitOfTime,
        value: f64,
    },
    /// Arbitrary structured sample
    Object {
        time: u64,
        unit: UnitOfTime,
        value: Value,
    },
    /// Pre-aggregated window
    Stats {
        time: u64,
        unit: UnitOfTime,
        count: u64,
        min: f64,
        mean: f64,
        max: f64,
    },
}

impl Reading {
    /// Decode one wire entry.
    ///
    /// `unit` is the declared unit of time, if any; without one the unit is
    /// guessed from the timestamp's magnitude. `path` only feeds error text.
    pub fn from_wire(
        entry: &[Value],
        unit: Option<UnitOfTime>,
        path: &str,
    ) -> Result<Self, ParseError> {
        let (time_field, rest) = entry.split_first().ok_or_else(|| ParseError::Reading {
            path: path.to_string(),
            reason: "empty reading".to_string(),
        })?;
        let time = parse_time(time_field, path)?;
        let unit = unit.unwrap_or_else(|| UnitOfTime::guess(time));

        match rest {
            [] => Err(ParseError::Reading {
                path: path.to_string(),
                reason: "reading has no value".to_string(),
            }),
            [value] => Ok(match value.as_f64() {
                Some(value) if value.is_finite() => Reading::Number { time, unit, value },
                _ => Reading::Object {
                    time,
                    unit,
                    value: value.clone(),
                },
            }),
            [count, min, mean, max] => {
                let number = |v: &Value| {
                    v.as_f64().ok_or_else(|| ParseError::Reading {
                        path: path.to_string(),
                        reason: format!("statistics field {} is not a number", v),
                    })
                };
                let count = count.as_u64().ok_or_else(|| ParseError::Reading {
                    path: path.to_string(),
                    reason: format!("statistics count {} is not an unsigned integer", count),
                })?;
                Ok(Reading::Stats {
                    time,
                    unit,
                    count,
                    min: number(min)?,
                    mean: number(mean)?,
                    max: number(max)?,
                })
            }
            _ => Err(ParseError::Reading {
                path: path.to_string(),
                reason: format!("expected 2 or 5 elements, got {}", entry.len()),
            }),
        }
    }

    /// Raw timestamp as received
    pub fn time(&self) -> u64 {
        match self {
            Reading::Number { time, .. }
            | Reading::Object { time, .. }
            | Reading::Stats { time, .. } => *time,
        }
    }

    /// Unit of [`Reading::time`]
    pub fn unit(&self) -> UnitOfTime {
        match self {
            Reading::Number { unit, .. }
            | Reading::Object { unit, .. }
            | Reading::Stats { unit, .. } => *unit,
        }
    }

    /// Replace the unit tag without touching the timestamp
    pub fn set_unit(&mut self, new_unit: UnitOfTime) {
        match self {
            Reading::Number { unit, .. }
            | Reading::Object { unit, .. }
            | Reading::Stats { unit, .. } => *unit = new_unit,
        }
    }

    /// Timestamp expressed in `to`
    pub fn converted_time(&self, to: UnitOfTime) -> Result<u64, TimeConvertError> {
        convert(self.time(), self.unit(), to)
    }

    /// Value as JSON; statistics become an object with `Count/Min/Mean/Max`
    pub fn value(&self) -> Value {
        match self {
            Reading::Number { value, .. } => {
                Number::from_f64(*value).map(Value::Number).unwrap_or(Value::Null)
            }
            Reading::Object { value, .. } => value.clone(),
            Reading::Stats {
                count,
                min,
                mean,
                max,
                ..
            } => json!({ "Count": count, "Min": min, "Mean": mean, "Max": max }),
        }
    }

    /// True for structured (non-numeric) readings
    pub fn is_object(&self) -> bool {
        matches!(self, Reading::Object { .. })
    }

    /// True for pre-aggregated readings
    pub fn is_stats(&self) -> bool {
        matches!(self, Reading::Stats { .. })
    }
}

/// Timestamps are unsigned integers; floats are truncated, anything else fails.
fn parse_time(field: &Value, path: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::Timestamp {
        path: path.to_string(),
        raw: field.to_string(),
    };
    match field {
        Value::Number(n) => match n.as_u64() {
            Some(t) => Ok(t),
            None => match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => Ok(f as u64),
                _ => Err(invalid()),
            },
        },
        _ => Err(invalid()),
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Number { time, value, .. } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(time)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            Reading::Object { time, value, .. } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(time)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            Reading::Stats {
                time,
                count,
                min,
                mean,
                max,
                ..
            } => {
                let mut seq = serializer.serialize_seq(Some(5))?;
                seq.serialize_element(time)?;
                seq.serialize_element(count)?;
                seq.serialize_element(min)?;
                seq.serialize_element(mean)?;
                seq.serialize_element(max)?;
                seq.end()
            }
        }
    }
}
