//! The compiled query and its public entry points.

use std::fmt;

use crate::classify::{classify, QueryType};
use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::extension::ExtensionRegistry;
use crate::item::ItemAccessor;
use crate::node::MatchNode;
use crate::parser::compile;

/// A query compiled once and searched many times.
///
/// ```
/// use tagquery::{MapItem, Query, QueryType};
///
/// let query = Query::new("artist = /pi.an/").expect("parse");
/// assert_eq!(query.query_type(), QueryType::Valid);
/// assert!(query.search(&MapItem::new().with_tag("artist", "piman")));
/// assert!(!query.search(&MapItem::new().with_tag("artist", "woman")));
/// ```
#[derive(Clone)]
pub struct Query {
    string: String,
    star: Vec<String>,
    root: MatchNode,
    query_type: QueryType,
}

impl Query {
    /// Compiles `text`, searching free text in the default star tags.
    pub fn new(text: &str) -> Result<Self> {
        Self::with_config(
            text,
            Vec::<String>::new(),
            QueryConfig::global(),
            ExtensionRegistry::global(),
        )
    }

    /// Compiles `text`, searching free text in `star`.
    pub fn with_star<I, S>(text: &str, star: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(text, star, QueryConfig::global(), ExtensionRegistry::global())
    }

    pub fn with_config<I, S>(
        text: &str,
        star: I,
        config: &QueryConfig,
        extensions: &ExtensionRegistry,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut star: Vec<String> = star.into_iter().map(Into::into).collect();
        if let Some(numeric) = star.iter().find(|tag| tag.starts_with("~#")) {
            return Err(QueryError::NumericStarTag(numeric.clone()));
        }
        if star.is_empty() {
            star = config.default_star.clone();
        }

        let (root, mode) = compile(text, &star, config, extensions)?;
        let query_type = QueryType::from_mode(mode);
        log::debug!("compiled {query_type} query {text:?}");
        Ok(Self {
            string: text.to_string(),
            star,
            root,
            query_type,
        })
    }

    /// True when `text` compiles under the strict grammar.
    pub fn is_valid(text: &str) -> bool {
        classify(text) == QueryType::Valid
    }

    /// True when `text` compiles at all, possibly as free text.
    pub fn is_parsable(text: &str) -> bool {
        classify(text) != QueryType::Invalid
    }

    /// True when `text` is empty or whitespace and so matches every item.
    pub fn matches_all(text: &str) -> bool {
        text.trim().is_empty()
    }

    pub fn search<I: ItemAccessor>(&self, item: &I) -> bool {
        self.root.search(item)
    }

    /// Keeps the matching items, in order.
    pub fn filter<I>(&self, items: I) -> Vec<I::Item>
    where
        I: IntoIterator,
        I::Item: ItemAccessor,
    {
        self.root.filter(items)
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// The text the query was compiled from.
    pub fn string(&self) -> &str {
        &self.string
    }

    pub fn star(&self) -> &[String] {
        &self.star
    }

    pub fn root(&self) -> &MatchNode {
        &self.root
    }

    pub fn into_node(self) -> MatchNode {
        self.root
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let star = self
            .star
            .iter()
            .map(|tag| format!("'{tag}'"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "<Query string='{}' type={} star=[{star}]>",
            self.string, self.query_type
        )
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string)
    }
}
