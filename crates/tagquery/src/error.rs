#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Query parse error: {0}")]
    Parse(String),

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("Unknown query extension: {0}")]
    UnknownExtension(String),

    #[error("Pattern not supported for diacritic folding: {0}")]
    UnsupportedPattern(String),

    #[error("Numeric tags cannot be used for free-text search: {0}")]
    NumericStarTag(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueryError {
    /// Returns true when the error means the query text itself is malformed.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::InvalidRegex(_) | Self::UnknownExtension(_)
        )
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
