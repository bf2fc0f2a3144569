// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Tiered message batches and metadata inheritance
//!
//! A tiered body maps paths to messages. Collections higher up the tree
//! describe everything below them, so before publishing, each timeseries
//! pulls in the metadata of its ancestors and the collections are dropped.
//!
//! ```text
//! /                 {Metadata: {Site: "Soda"}}
//! /hvac             {Metadata: {System: "HVAC"}}
//! /hvac/vav1/temp   {uuid: "...", Readings: [...]}
//!        │
//!        ▼  collapse_to_timeseries()
//! /hvac/vav1/temp   {uuid: "...", Metadata: {Site: "Soda", System: "HVAC"}}
//! ```

use crate::error::ParseError;
use crate::message::Message;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One request's batch of messages, keyed by path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TieredMessageSet {
    messages: BTreeMap<String, Message>,
}

impl TieredMessageSet {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a request body
    pub fn from_slice(body: &[u8]) -> Result<Self, ParseError> {
        let raw: Map<String, Value> = serde_json::from_slice(body)?;
        let mut set = Self::new();
        for (path, value) in raw {
            let message = Message::from_value(&path, value)?;
            set.messages.insert(path, message);
        }
        Ok(set)
    }

    /// Add or replace the message at `message.path`
    pub fn insert(&mut self, message: Message) {
        self.messages.insert(message.path.clone(), message);
    }

    /// Message stored at `path`
    pub fn get(&self, path: &str) -> Option<&Message> {
        self.messages.get(path)
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the batch is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in path order
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Total metadata keys across the batch
    pub fn metadata_count(&self) -> usize {
        self.messages.values().map(|m| m.metadata.len()).sum()
    }

    /// Total readings across the batch
    pub fn reading_count(&self) -> usize {
        self.messages.values().map(|m| m.readings.len()).sum()
    }

    /// Apply metadata inheritance and keep only timeseries.
    ///
    /// For each timeseries, ancestors are visited nearest first and only
    /// fill keys the timeseries does not already have, so the closest
    /// ancestor wins. Ancestors are read as received, never as enriched by
    /// this pass, which makes the result independent of visiting order.
    pub fn collapse_to_timeseries(self) -> TieredMessageSet {
        let mut collapsed = BTreeMap::new();
        for (path, message) in &self.messages {
            if !message.is_timeseries() {
                continue;
            }
            let mut leaf = message.clone();
            for prefix in path_prefixes(path).iter().rev() {
                match self.messages.get(prefix) {
                    Some(ancestor) if ancestor.has_metadata() => leaf.inherit_from(ancestor),
                    _ => continue,
                }
            }
            collapsed.insert(path.clone(), leaf);
        }
        TieredMessageSet {
            messages: collapsed,
        }
    }
}

impl IntoIterator for TieredMessageSet {
    type Item = Message;
    type IntoIter = std::collections::btree_map::IntoValues<String, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_values()
    }
}

impl FromIterator<Message> for TieredMessageSet {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        let mut set = Self::new();
        for message in iter {
            set.insert(message);
        }
        set
    }
}

/// Ancestor paths of `path`, root first, excluding `path` itself.
///
/// `"a/b/c"` and `"/a/b/c"` both give `["/", "/a", "/a/b"]`. The root has
/// no ancestors, so `"/"` and `""` give an empty chain.
pub fn path_prefixes(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((_, parents)) = segments.split_last() else {
        return Vec::new();
    };
    let mut prefixes = vec!["/".to_string()];
    let mut root = String::new();
    for segment in parents {
        root.push('/');
        root.push_str(segment);
        prefixes.push(root.clone());
    }
    prefixes
}
