//! The match tree: compiled, immutable predicates over items.

use std::ops::{BitAnd, BitOr, Not};

use crate::extension::ExtensionCall;
use crate::item::ItemAccessor;
use crate::numexpr::NumericComparison;
use crate::pattern::ValueMatcher;

/// A compiled predicate node.
///
/// Build composite nodes through [`MatchNode::union`], [`MatchNode::inter`]
/// and [`MatchNode::negate`] (or the `|`, `&` and `!` operators), which keep
/// the tree flat.
#[derive(Debug, Clone)]
pub enum MatchNode {
    /// Matches everything.
    True,
    Neg(Box<MatchNode>),
    Union(Vec<MatchNode>),
    /// An empty intersection matches nothing.
    Inter(Vec<MatchNode>),
    Tag(TagMatch),
    NumCmp(NumericComparison),
    Extension(ExtensionCall),
}

impl MatchNode {
    pub fn search(&self, item: &dyn ItemAccessor) -> bool {
        match self {
            Self::True => true,
            Self::Neg(child) => !child.search(item),
            Self::Union(children) => children.iter().any(|child| child.search(item)),
            Self::Inter(children) => {
                !children.is_empty() && children.iter().all(|child| child.search(item))
            }
            Self::Tag(tag) => tag.search(item),
            Self::NumCmp(comparison) => comparison.search(item),
            Self::Extension(call) => call.search(item),
        }
    }

    /// Keeps the items this node matches, in order.
    pub fn filter<I>(&self, items: I) -> Vec<I::Item>
    where
        I: IntoIterator,
        I::Item: ItemAccessor,
    {
        items.into_iter().filter(|item| self.search(item)).collect()
    }

    pub fn union(children: impl IntoIterator<Item = MatchNode>) -> Self {
        let mut flat = Vec::new();
        for child in children {
            match child {
                Self::True => return Self::True,
                Self::Union(nested) => flat.extend(nested),
                other => flat.push(other),
            }
        }
        match flat.len() {
            1 => flat.remove(0),
            _ => Self::Union(flat),
        }
    }

    pub fn inter(children: impl IntoIterator<Item = MatchNode>) -> Self {
        let mut flat = Vec::new();
        let mut saw_true = false;
        for child in children {
            match child {
                Self::True => saw_true = true,
                Self::Inter(nested) if !nested.is_empty() => flat.extend(nested),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 if saw_true => Self::True,
            1 => flat.remove(0),
            _ => Self::Inter(flat),
        }
    }

    pub fn negate(node: MatchNode) -> Self {
        match node {
            Self::Neg(inner) => *inner,
            other => Self::Neg(Box::new(other)),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }
}

impl BitOr for MatchNode {
    type Output = MatchNode;

    fn bitor(self, rhs: MatchNode) -> MatchNode {
        MatchNode::union([self, rhs])
    }
}

impl BitAnd for MatchNode {
    type Output = MatchNode;

    fn bitand(self, rhs: MatchNode) -> MatchNode {
        MatchNode::inter([self, rhs])
    }
}

impl Not for MatchNode {
    type Output = MatchNode;

    fn not(self) -> MatchNode {
        MatchNode::negate(self)
    }
}

// ---------------------------------------------------------------------------
// Tag leaves
// ---------------------------------------------------------------------------

/// Value predicate shared by the tags of a `tag, tag = value` match.
#[derive(Debug, Clone)]
pub enum ValueNode {
    Pattern(ValueMatcher),
    Neg(Box<ValueNode>),
    Union(Vec<ValueNode>),
    Inter(Vec<ValueNode>),
}

impl ValueNode {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Pattern(matcher) => matcher.is_match(value),
            Self::Neg(inner) => !inner.matches(value),
            Self::Union(children) => children.iter().any(|child| child.matches(value)),
            Self::Inter(children) => {
                !children.is_empty() && children.iter().all(|child| child.matches(value))
            }
        }
    }

    pub fn negate(node: ValueNode) -> Self {
        match node {
            Self::Neg(inner) => *inner,
            other => Self::Neg(Box::new(other)),
        }
    }
}

/// Matches a value predicate against one tag.
///
/// Multiple values are joined with `\n`; compiled patterns are multi-line
/// so anchors apply per value. A missing tag is searched as `""`.
#[derive(Debug, Clone)]
pub struct TagMatch {
    key: String,
    fallback: Option<String>,
    value: ValueNode,
}

impl TagMatch {
    /// `key` must already be resolved (lower-cased, abbreviations applied).
    /// Plain keys fall back to their synthetic `~key` when absent.
    pub fn new(key: impl Into<String>, value: ValueNode) -> Self {
        let key = key.into();
        let fallback = (!key.starts_with('~')).then(|| format!("~{key}"));
        Self {
            key,
            fallback,
            value,
        }
    }

    pub fn search(&self, item: &dyn ItemAccessor) -> bool {
        let value = item
            .get(&self.key)
            .or_else(|| self.fallback.as_deref().and_then(|key| item.get(key)));
        self.value.matches(value.as_deref().unwrap_or(""))
    }
}
