//! Tag query language for media libraries.
//!
//! This crate compiles query text into a predicate over tagged items:
//! - Tag matches with regex, quoted and bare values (`artist = /pi.an/`)
//! - Boolean combinators (`&(...)`, `|(...)`, `!`)
//! - Numeric, duration, size and date comparisons (`#(length > 3 minutes)`)
//! - Accent-insensitive matching by default
//! - Free text searched across a configurable set of tags
//! - Host supplied extensions (`@(name: body)`)

pub mod classify;
pub mod config;
pub mod diacritic;
pub mod error;
pub mod extension;
pub mod item;
pub mod node;
pub mod numexpr;
pub mod parser;
pub mod pattern;
pub mod query;

// Re-export main types
pub use classify::{classify, classify_with, QueryType};
pub use config::QueryConfig;
pub use diacritic::expand_literal;
pub use error::{QueryError, Result};
pub use extension::{ExtensionCall, ExtensionRegistry, QueryExtension};
pub use item::{ItemAccessor, MapItem};
pub use node::{MatchNode, TagMatch, ValueNode};
pub use numexpr::{CompareOp, NumExpr, NumericComparison, Unit};
pub use parser::{compile, ParseMode, QueryParser};
pub use pattern::{PatternFlags, ValueMatcher};
pub use query::Query;
