// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ontology-backed class resolution
//!
//! Building models name points and equipment with very specific classes
//! (`Zone_Air_Temperature_Sensor`, `VAV_With_Reheat`, ...). Addresses only
//! use a handful of canonical categories, so each class is mapped to the
//! first category it is a (reflexive, transitive) subclass of.

use crate::error::ResolveError;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// One result row: variable name (with `?`) to value
pub type QueryRow = HashMap<String, String>;

/// Structured query endpoint of the ontology
pub trait Ontology: Send + Sync {
    /// Run a query and return its rows
    fn query(&self, query: &str) -> Result<Vec<QueryRow>, ResolveError>;
}

impl<O: Ontology + ?Sized> Ontology for Arc<O> {
    fn query(&self, query: &str) -> Result<Vec<QueryRow>, ResolveError> {
        (**self).query(query)
    }
}

/// Canonical point/equipment categories, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalClass {
    Damper,
    Vav,
    Sensor,
    Command,
    Setpoint,
    Status,
}

impl CanonicalClass {
    /// Match order; the first category a class belongs to wins
    pub const ORDERED: [CanonicalClass; 6] = [
        CanonicalClass::Damper,
        CanonicalClass::Vav,
        CanonicalClass::Sensor,
        CanonicalClass::Command,
        CanonicalClass::Setpoint,
        CanonicalClass::Status,
    ];

    /// Class name in the ontology namespace
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalClass::Damper => "Damper",
            CanonicalClass::Vav => "VAV",
            CanonicalClass::Sensor => "Sensor",
            CanonicalClass::Command => "Command",
            CanonicalClass::Setpoint => "Setpoint",
            CanonicalClass::Status => "Status",
        }
    }
}

impl fmt::Display for CanonicalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a point after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Point entity name
    pub point: String,
    /// Exact point class
    pub point_class: String,
    /// Owning equipment entity name
    pub equipment: String,
    /// Exact equipment class
    pub equipment_class: String,
    /// Canonical category of the point, if any
    pub generic_point_class: Option<CanonicalClass>,
    /// Canonical category of the equipment, if any
    pub generic_equipment_class: Option<CanonicalClass>,
}

/// Query text looking up a point and its equipment by uuid
pub fn point_query(uuid: &str) -> String {
    format!(
        r#"SELECT ?name ?class ?equip ?equipclass WHERE {{
            ?name bf:uuid "{}" .
            ?name rdf:type ?class .
            {{
                ?name bf:isPointOf ?equip .
                OR
                ?name bf:isPartOf ?equip .
            }}
            ?equip rdf:type ?equipclass .
        }};"#,
        uuid.replace('"', "")
    )
}

/// Query text listing every subclass of a category, the category included
pub fn subclass_query(superclass: CanonicalClass) -> String {
    format!(
        r#"SELECT ?class WHERE {{
            ?class rdfs:subClassOf* brick:{} .
        }};"#,
        superclass
    )
}

/// Maps points to their equipment and canonical categories
pub struct ClassResolver<O> {
    ontology: O,
}

impl<O: Ontology> ClassResolver<O> {
    /// Create a resolver over an ontology endpoint
    pub fn new(ontology: O) -> Self {
        Self { ontology }
    }

    /// Underlying ontology
    pub fn ontology(&self) -> &O {
        &self.ontology
    }

    /// Look up a point by uuid and classify it and its equipment.
    ///
    /// A point the ontology does not know fails with `NotFound`. A class
    /// that fits no category resolves to `None` rather than failing.
    pub fn resolve(&self, uuid: &str) -> Result<Resolution, ResolveError> {
        let rows = self.ontology.query(&point_query(uuid))?;
        let row = rows.first().ok_or_else(|| ResolveError::NotFound {
            uuid: uuid.to_string(),
        })?;

        let field = |name: &str| {
            row.get(name)
                .cloned()
                .ok_or_else(|| ResolveError::MissingVariable {
                    variable: name.to_string(),
                })
        };
        let point = field("?name")?;
        let point_class = field("?class")?;
        let equipment = field("?equip")?;
        let equipment_class = field("?equipclass")?;
        debug!("{} is a {} on {} ({})", point, point_class, equipment, equipment_class);

        Ok(Resolution {
            generic_point_class: self.canonical(&point_class)?,
            generic_equipment_class: self.canonical(&equipment_class)?,
            point,
            point_class,
            equipment,
            equipment_class,
        })
    }

    /// First canonical category `class` belongs to
    pub fn canonical(&self, class: &str) -> Result<Option<CanonicalClass>, ResolveError> {
        for candidate in CanonicalClass::ORDERED {
            if self.is_subclass_of(class, candidate)? {
                debug!("{} is subclass of {}", class, candidate);
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Reflexive-transitive subclass test
    pub fn is_subclass_of(
        &self,
        class: &str,
        superclass: CanonicalClass,
    ) -> Result<bool, ResolveError> {
        let rows = self.ontology.query(&subclass_query(superclass))?;
        Ok(rows
            .iter()
            .any(|row| row.get("?class").map(String::as_str) == Some(class)))
    }
}

/// Point record held by [`MemoryOntology`]
#[derive(Debug, Clone)]
struct PointRecord {
    name: String,
    class: String,
    equipment: String,
    equipment_class: String,
}

/// Small in-process ontology answering the two query shapes the resolver
/// issues. Meant for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryOntology {
    /// child class -> direct parents
    parents: HashMap<String, Vec<String>>,
    /// uuid -> point
    points: HashMap<String, PointRecord>,
}

impl MemoryOntology {
    /// Create an empty ontology
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `class rdfs:subClassOf parent`
    pub fn subclass(mut self, class: &str, parent: &str) -> Self {
        self.parents
            .entry(class.to_string())
            .or_default()
            .push(parent.to_string());
        self
    }

    /// Declare a point with its equipment
    pub fn point(
        mut self,
        uuid: &str,
        name: &str,
        class: &str,
        equipment: &str,
        equipment_class: &str,
    ) -> Self {
        self.points.insert(
            uuid.to_string(),
            PointRecord {
                name: name.to_string(),
                class: class.to_string(),
                equipment: equipment.to_string(),
                equipment_class: equipment_class.to_string(),
            },
        );
        self
    }

    fn descends_from(&self, class: &str, ancestor: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(parents) = self.parents.get(&current) {
                stack.extend(parents.iter().cloned());
            }
        }
        false
    }

    fn known_classes(&self) -> HashSet<&str> {
        let mut classes: HashSet<&str> = HashSet::new();
        for (child, parents) in &self.parents {
            classes.insert(child);
            classes.extend(parents.iter().map(String::as_str));
        }
        for point in self.points.values() {
            classes.insert(&point.class);
            classes.insert(&point.equipment_class);
        }
        classes
    }
}

fn quoted_after<'a>(query: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &query[query.find(marker)? + marker.len()..];
    let rest = rest.strip_prefix('"')?;
    rest.split('"').next()
}

fn word_after<'a>(query: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &query[query.find(marker)? + marker.len()..];
    rest.split(|c: char| !(c.is_alphanumeric() || c == '_')).next()
}

impl Ontology for MemoryOntology {
    fn query(&self, query: &str) -> Result<Vec<QueryRow>, ResolveError> {
        if let Some(uuid) = quoted_after(query, "bf:uuid ") {
            return Ok(self
                .points
                .get(uuid)
                .map(|p| {
                    vec![QueryRow::from([
                        ("?name".to_string(), p.name.clone()),
                        ("?class".to_string(), p.class.clone()),
                        ("?equip".to_string(), p.equipment.clone()),
                        ("?equipclass".to_string(), p.equipment_class.clone()),
                    ])]
                })
                .unwrap_or_default());
        }
        if let Some(superclass) = word_after(query, "brick:") {
            let mut rows: Vec<QueryRow> = self
                .known_classes()
                .into_iter()
                .filter(|class| self.descends_from(class, superclass))
                .map(|class| QueryRow::from([("?class".to_string(), class.to_string())]))
                .collect();
            if rows.is_empty() {
                rows.push(QueryRow::from([(
                    "?class".to_string(),
                    superclass.to_string(),
                )]));
            }
            return Ok(rows);
        }
        Err(ResolveError::Query(format!("unsupported query: {}", query)))
    }
}
