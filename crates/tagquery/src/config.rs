//! Tunables for query compilation.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::Result;

static DEFAULT_CONFIG: LazyLock<QueryConfig> = LazyLock::new(QueryConfig::default);

/// Settings consulted while compiling a query.
///
/// Tag families use the numeric spelling (`~#length`) because they are only
/// consulted for tags referenced inside `#(...)` comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Tolerance applied by `=` / `!=` in numeric comparisons.
    pub almost_equal_epsilon: f64,
    /// Decimal digits numeric tag values are rounded to before comparing.
    pub round_digits: u32,
    /// Tags searched by free text when the caller passes no star tags.
    pub default_star: Vec<String>,
    pub abbreviations: BTreeMap<String, String>,
    /// Timestamp tags; compared as ages unless the comparison uses dates.
    pub time_tags: Vec<String>,
    pub duration_tags: Vec<String>,
    pub size_tags: Vec<String>,
    /// Characters removed from free-text words and bare values before matching.
    pub ignored_characters: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let abbreviations = [
            ("a", "artist"),
            ("b", "album"),
            ("v", "version"),
            ("t", "title"),
            ("n", "tracknumber"),
            ("d", "date"),
        ]
        .into_iter()
        .map(|(short, long)| (short.to_string(), long.to_string()))
        .collect();

        Self {
            almost_equal_epsilon: 0.01,
            round_digits: 2,
            default_star: to_strings(&["artist", "album", "title", "version"]),
            abbreviations,
            time_tags: to_strings(&["~#added", "~#mtime", "~#lastplayed", "~#laststarted"]),
            duration_tags: to_strings(&["~#length"]),
            size_tags: to_strings(&["~#filesize"]),
            ignored_characters: String::new(),
        }
    }
}

impl QueryConfig {
    /// Returns the process-wide default configuration.
    pub fn global() -> &'static QueryConfig {
        &DEFAULT_CONFIG
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Lowercases a tag name and resolves abbreviations.
    pub fn resolve_tag(&self, name: &str) -> String {
        let lowered = name.trim().to_lowercase();
        match self.abbreviations.get(&lowered) {
            Some(full) => full.clone(),
            None => lowered,
        }
    }

    /// Drops every ignored character from `text`.
    pub fn strip_ignored<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let ignored = |ch: char| self.ignored_characters.contains(ch);
        if self.ignored_characters.is_empty() || !text.contains(ignored) {
            return Cow::Borrowed(text);
        }
        Cow::Owned(text.chars().filter(|&ch| !ignored(ch)).collect())
    }

    pub fn is_time_tag(&self, numeric_tag: &str) -> bool {
        self.time_tags.iter().any(|tag| tag == numeric_tag)
    }

    pub fn is_duration_tag(&self, numeric_tag: &str) -> bool {
        self.duration_tags.iter().any(|tag| tag == numeric_tag)
    }

    pub fn is_size_tag(&self, numeric_tag: &str) -> bool {
        self.size_tags.iter().any(|tag| tag == numeric_tag)
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_abbreviations_case_insensitively() {
        let config = QueryConfig::default();
        assert_eq!(config.resolve_tag("A"), "artist");
        assert_eq!(config.resolve_tag(" t "), "title");
        assert_eq!(config.resolve_tag("Genre"), "genre");
    }

    #[test]
    fn json_overrides_keep_other_defaults() {
        let config = QueryConfig::from_json(r#"{"almost_equal_epsilon": 0.5}"#).expect("config");
        assert_eq!(config.almost_equal_epsilon, 0.5);
        assert_eq!(config.round_digits, 2);
        assert!(config.is_duration_tag("~#length"));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let error = QueryConfig::from_json("{").expect_err("should fail");
        assert!(matches!(error, crate::error::QueryError::Config(_)));
    }

    #[test]
    fn ignored_characters_are_stripped() {
        let config = QueryConfig::from_json(r#"{"ignored_characters": "-1"}"#).expect("config");
        assert_eq!(config.strip_ignored("a-b1c"), "abc");
        assert!(matches!(config.strip_ignored("abc"), Cow::Borrowed("abc")));
        assert_eq!(QueryConfig::global().strip_ignored("a-b"), "a-b");
    }

    #[test]
    fn tag_families() {
        let config = QueryConfig::global();
        assert!(config.is_time_tag("~#added"));
        assert!(!config.is_time_tag("~#length"));
        assert!(config.is_size_tag("~#filesize"));
    }
}
