//! Three-way validity of query text.

use std::fmt;

use serde::Serialize;

use crate::config::QueryConfig;
use crate::extension::ExtensionRegistry;
use crate::parser::{compile, ParseMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    /// The text does not compile.
    Invalid,
    /// The text compiles only as free text over the star tags.
    Text,
    /// The text compiles under the strict grammar.
    Valid,
}

impl QueryType {
    pub(crate) fn from_mode(mode: ParseMode) -> Self {
        match mode {
            ParseMode::Explicit => Self::Valid,
            ParseMode::FreeText => Self::Text,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invalid => "INVALID",
            Self::Text => "TEXT",
            Self::Valid => "VALID",
        })
    }
}

/// Classifies `text` with the default configuration and extensions.
pub fn classify(text: &str) -> QueryType {
    classify_with(text, QueryConfig::global(), ExtensionRegistry::global())
}

pub fn classify_with(
    text: &str,
    config: &QueryConfig,
    extensions: &ExtensionRegistry,
) -> QueryType {
    match compile(text, &config.default_star, config, extensions) {
        Ok((_, mode)) => QueryType::from_mode(mode),
        Err(_) => QueryType::Invalid,
    }
}
