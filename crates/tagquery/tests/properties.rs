//! Property-based tests for query evaluation.
//!
//! These check structural guarantees of compiled queries against randomly
//! generated items, independent of any particular tag values.

use proptest::prelude::*;
use tagquery::{MapItem, Query};

// =============================================================================
// Helpers
// =============================================================================

const KEYS: [&str; 5] = ["artist", "album", "title", "version", "genre"];

/// Strict queries whose negation must flip the result on every item.
const QUERIES: [&str; 10] = [
    "artist = a",
    "title = /[aeiou]{2}/",
    r#"album = "abc""#,
    "|(artist = a, title = e)",
    "&(artist = a, album = !b)",
    "genre, version = é",
    "#(playcount > skipcount)",
    "#(playcount * 2 < 10)",
    "#(skipcount / playcount > 0.5)",
    "!|(ab, cd)",
];

fn item_strategy() -> impl Strategy<Value = MapItem> {
    (
        prop::collection::vec(
            (prop::sample::select(KEYS.to_vec()), "[a-zA-Zåäöé ]{0,12}"),
            0..5,
        ),
        0u32..50,
        0u32..50,
    )
        .prop_map(|(tags, playcount, skipcount)| {
            tags.into_iter()
                .collect::<MapItem>()
                .with_number("playcount", f64::from(playcount))
                .with_number("skipcount", f64::from(skipcount))
        })
}

fn query(text: &str) -> Query {
    Query::new(text).unwrap_or_else(|error| panic!("{text:?} failed to parse: {error}"))
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    /// Blank queries match every item.
    #[test]
    fn blank_query_matches_everything(item in item_strategy(), spaces in " {0,4}") {
        prop_assert!(query(&spaces).search(&item));
    }

    /// Prefixing `!` inverts the result of a strict query.
    #[test]
    fn negation_inverts(item in item_strategy(), text in prop::sample::select(QUERIES.to_vec())) {
        let positive = query(text);
        let negative = query(&format!("!{text}"));
        prop_assert_ne!(positive.search(&item), negative.search(&item));
    }

    /// The order of children in `&(...)` and `|(...)` does not matter.
    #[test]
    fn group_order_is_irrelevant(
        item in item_strategy(),
        children in Just(QUERIES.to_vec()).prop_shuffle(),
    ) {
        let sorted = QUERIES.join(", ");
        let shuffled = children.join(", ");
        for combinator in ["&", "|"] {
            let in_order = query(&format!("{combinator}({sorted})"));
            let reordered = query(&format!("{combinator}({shuffled})"));
            prop_assert_eq!(in_order.search(&item), reordered.search(&item));
        }
    }

    /// Filtering keeps a subsequence of the input.
    #[test]
    fn filter_keeps_an_ordered_subset(
        items in prop::collection::vec(item_strategy(), 0..12),
        text in prop::sample::select(QUERIES.to_vec()),
    ) {
        let kept = query(text).filter(items.iter());
        prop_assert!(kept.len() <= items.len());

        let mut remaining = items.iter();
        for item in kept {
            prop_assert!(remaining.any(|candidate| std::ptr::eq(candidate, item)));
        }
    }

    /// Division by an item's zero-valued tag is never a match, and never panics.
    #[test]
    fn zero_divisor_never_matches(item in item_strategy(), op in prop::sample::select(vec!["<", ">", "=", "!=", "<=", ">="])) {
        let text = format!("#(playcount / (skipcount - skipcount) {op} 0)");
        prop_assert!(!query(&text).search(&item));
    }

    /// Free text that is a single plain word searches the default tags as a substring.
    #[test]
    fn plain_word_is_substring_search(word in "[a-z]{1,6}", item in item_strategy()) {
        let expected = ["artist", "album", "title", "version"].iter().any(|key| {
            tagquery::ItemAccessor::get(&item, key)
                .is_some_and(|value| value.to_lowercase().contains(&word))
        });
        // Folding may widen the match, never narrow it.
        if expected {
            prop_assert!(query(&word).search(&item));
        }
    }
}
