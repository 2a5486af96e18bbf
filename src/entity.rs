//! Best-effort entity extraction from free-text analysis.
//!
//! Agents answer in prose, so the application a follow-up action should
//! target has to be fished out of the text. The pattern list is brittle by
//! nature and lives behind [`EntityExtractor`] so it can change without
//! touching anything else.

use crate::config::DEFAULT_ENTITY_PATTERNS;
use regex::Regex;

/// Minimum length for an extracted name to be trusted.
const MIN_ENTITY_LEN: usize = 3;

pub trait EntityExtractor: Send + Sync {
    /// Return the first plausible entity name in `text`.
    fn extract_entity(&self, text: &str) -> Option<String>;
}

/// Tries each pattern in order; the first capture group of the first match
/// at least three characters long wins.
#[derive(Debug, Clone)]
pub struct RegexEntityExtractor {
    patterns: Vec<Regex>,
}

impl RegexEntityExtractor {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }
}

impl Default for RegexEntityExtractor {
    fn default() -> Self {
        Self::new(
            DEFAULT_ENTITY_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        )
    }
}

impl EntityExtractor for RegexEntityExtractor {
    fn extract_entity(&self, text: &str) -> Option<String> {
        self.patterns.iter().find_map(|re| {
            re.captures_iter(text).find_map(|caps| {
                let name = caps.get(1)?.as_str().trim_end_matches(['.', ',']);
                (name.chars().count() >= MIN_ENTITY_LEN).then(|| name.to_string())
            })
        })
    }
}
