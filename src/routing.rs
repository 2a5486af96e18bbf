//! Routing key extraction from inbound alert bodies.
//!
//! Cloud monitoring alerts carry the affected resource as a composite
//! identifier such as `ap-guangzhou#cls-abc123#node-7`. The cluster token is
//! the routing key; anything without one is out of scope for this service.

use crate::config::RoutingConfig;
use crate::queue::InboundAlert;

/// Pure, deterministic routing key extractor.
#[derive(Debug, Clone)]
pub struct KeyExtractor {
    pointer: String,
    separator: String,
    prefix: String,
}

impl Default for KeyExtractor {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

impl KeyExtractor {
    pub fn new(
        pointer: impl Into<String>,
        separator: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            pointer: pointer.into(),
            separator: separator.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(&config.pointer, &config.separator, &config.prefix)
    }

    /// Extract the routing key from an inbound alert.
    ///
    /// Returns `None` when the body is missing or not a JSON object, when the
    /// pointer does not resolve to a string, or when the composite string has
    /// no `<separator><prefix>` token.
    pub fn extract(&self, alert: &InboundAlert) -> Option<String> {
        let body = alert.request_body.as_ref()?;
        if !body.is_object() {
            return None;
        }
        let composite = body.pointer(&self.pointer)?.as_str()?;
        self.extract_from(composite)
    }

    /// Extract the key from an already-located composite identifier.
    pub fn extract_from(&self, composite: &str) -> Option<String> {
        let marker = format!("{}{}", self.separator, self.prefix);
        if !composite.contains(&marker) {
            return None;
        }
        composite
            .split(self.separator.as_str())
            .find(|segment| segment.starts_with(&self.prefix) && segment.len() > self.prefix.len())
            .map(str::to_string)
    }
}
