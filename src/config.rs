//! Relay configuration

use crate::time::UnitOfTime;

/// Content tag of identity-variant timeseries payloads
pub const TIMESERIES_CONTENT_TAG: &str = "2.0.9.1";
/// Content tag of ontology-routed point payloads
pub const POINT_CONTENT_TAG: &str = "2.0.0.0";

/// Settings shared by both ingest pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Unit every published timestamp is converted to; `None` publishes
    /// timestamps as received
    pub publish_unit: Option<UnitOfTime>,
    /// Content tag for `{uuid, time, value}` payloads
    pub timeseries_content_tag: String,
    /// Content tag for resolved point payloads
    pub point_content_tag: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publish_unit: Some(UnitOfTime::Nanoseconds),
            timeseries_content_tag: TIMESERIES_CONTENT_TAG.to_string(),
            point_content_tag: POINT_CONTENT_TAG.to_string(),
        }
    }
}

impl RelayConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the published unit of time
    pub fn with_publish_unit(mut self, unit: Option<UnitOfTime>) -> Self {
        self.publish_unit = unit;
        self
    }

    /// Set the timeseries content tag
    pub fn with_timeseries_content_tag(mut self, tag: impl Into<String>) -> Self {
        self.timeseries_content_tag = tag.into();
        self
    }

    /// Set the point content tag
    pub fn with_point_content_tag(mut self, tag: impl Into<String>) -> Self {
        self.point_content_tag = tag.into();
        self
    }
}
