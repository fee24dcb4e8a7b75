//! Item access for query evaluation.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Read access to the tags of a media item.
///
/// Keys starting with `~` are synthetic (computed by the item), and keys
/// starting with `~#` are numeric. Multi-valued tags are joined with `\n`
/// by [`ItemAccessor::get`] and split by [`ItemAccessor::list`].
pub trait ItemAccessor {
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    fn list(&self, key: &str) -> Vec<Cow<'_, str>> {
        match self.get(key) {
            Some(Cow::Borrowed(value)) => value.split('\n').map(Cow::Borrowed).collect(),
            Some(Cow::Owned(value)) => value
                .split('\n')
                .map(|part| Cow::Owned(part.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Numeric value for a `~#` key, optionally suffixed by an aggregate
    /// name such as `~#playcount:avg`. Multi-valued tags use their first value.
    fn numeric(&self, key: &str) -> Option<f64> {
        self.list(key).first().and_then(|value| leading_number(value))
    }

    fn get_or<'a>(&'a self, key: &str, default: &'a str) -> Cow<'a, str> {
        self.get(key).unwrap_or(Cow::Borrowed(default))
    }
}

impl<T: ItemAccessor + ?Sized> ItemAccessor for &T {
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        (**self).get(key)
    }

    fn list(&self, key: &str) -> Vec<Cow<'_, str>> {
        (**self).list(key)
    }

    fn numeric(&self, key: &str) -> Option<f64> {
        (**self).numeric(key)
    }
}

// ---------------------------------------------------------------------------
// In-memory item
// ---------------------------------------------------------------------------

/// A tag map backed item, useful for tests and for callers whose items
/// are plain dictionaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapItem {
    tags: BTreeMap<String, Vec<String>>,
    numbers: BTreeMap<String, f64>,
}

impl MapItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text tag. Values containing `\n` become multiple values.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds a numeric tag; `length` and `~#length` name the same tag.
    pub fn with_number(mut self, key: impl AsRef<str>, value: f64) -> Self {
        self.set_number(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl AsRef<str>) {
        let values = value.as_ref().split('\n').map(str::to_string).collect();
        self.tags.insert(key.into(), values);
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.entry(key.into()).or_default().push(value.into());
    }

    pub fn set_number(&mut self, key: impl AsRef<str>, value: f64) {
        self.numbers.insert(numeric_key(key.as_ref()), value);
    }

    fn synthetic_text(&self, key: &str) -> Option<String> {
        let filename = self.tags.get("~filename")?.first()?;
        let path = Path::new(filename);
        match key {
            "~basename" => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            "~dirname" => path
                .parent()
                .map(|parent| parent.to_string_lossy().into_owned()),
            _ => None,
        }
    }

    fn synthetic_number(&self, key: &str) -> Option<f64> {
        let source = match key {
            "~#track" => "tracknumber",
            "~#disc" => "discnumber",
            "~#year" => "date",
            _ => return None,
        };
        let value = self.tags.get(source)?.first()?;
        if key == "~#year" {
            return value.get(..4).and_then(|year| year.parse().ok());
        }
        leading_number(value)
    }
}

impl<K, V> FromIterator<(K, V)> for MapItem
where
    K: Into<String>,
    V: AsRef<str>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut item = Self::new();
        for (key, value) in iter {
            item.insert(key, value);
        }
        item
    }
}

impl ItemAccessor for MapItem {
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        if let Some(values) = self.tags.get(key) {
            return Some(match values.as_slice() {
                [single] => Cow::Borrowed(single.as_str()),
                many => Cow::Owned(many.join("\n")),
            });
        }
        if let Some(number) = self.numbers.get(key) {
            return Some(Cow::Owned(number.to_string()));
        }
        self.synthetic_text(key).map(Cow::Owned)
    }

    fn list(&self, key: &str) -> Vec<Cow<'_, str>> {
        match self.tags.get(key) {
            Some(values) => values.iter().map(|value| Cow::Borrowed(value.as_str())).collect(),
            None => self
                .get(key)
                .map(|value| vec![Cow::Owned(value.into_owned())])
                .unwrap_or_default(),
        }
    }

    fn numeric(&self, key: &str) -> Option<f64> {
        // A single item aggregates to itself.
        let base = key.split(':').next().unwrap_or(key);
        if let Some(number) = self.numbers.get(base) {
            return Some(*number);
        }
        if let Some(number) = self.synthetic_number(base) {
            return Some(number);
        }
        self.list(base).first().and_then(|value| leading_number(value))
    }
}

fn numeric_key(key: &str) -> String {
    if key.starts_with("~#") {
        key.to_string()
    } else {
        format!("~#{}", key.trim_start_matches('~'))
    }
}

/// Parses the numeric prefix of a tag value (`"12/15"` is 12).
pub(crate) fn leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let mut end = 0;
    for (index, ch) in trimmed.char_indices() {
        let sign = index == 0 && (ch == '-' || ch == '+');
        if !(ch.is_ascii_digit() || ch == '.' || sign) {
            break;
        }
        end = index + ch.len_utf8();
    }
    trimmed[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_values_join_and_split() {
        let item = MapItem::new().with_tag("artist", "piman\nmu");
        assert_eq!(item.get("artist").as_deref(), Some("piman\nmu"));
        let values = item.list("artist");
        assert_eq!(values, vec!["piman", "mu"]);
    }

    #[test]
    fn numbers_accept_bare_or_prefixed_keys() {
        let item = MapItem::new()
            .with_number("length", 224.0)
            .with_number("~#playcount", 3.0);
        assert_eq!(item.numeric("~#length"), Some(224.0));
        assert_eq!(item.numeric("~#playcount:min"), Some(3.0));
        assert_eq!(item.numeric("~#missing"), None);
    }

    #[test]
    fn track_number_is_synthesized() {
        let item = MapItem::new()
            .with_tag("tracknumber", "12/15")
            .with_tag("date", "2007-05-24");
        assert_eq!(item.numeric("~#track"), Some(12.0));
        assert_eq!(item.numeric("~#year"), Some(2007.0));
    }

    #[test]
    fn path_tags_are_synthesized() {
        let item = MapItem::new().with_tag("~filename", "/dir1/foobar.ogg");
        assert_eq!(item.get("~basename").as_deref(), Some("foobar.ogg"));
        assert_eq!(item.get("~dirname").as_deref(), Some("/dir1"));
        assert_eq!(item.get_or("~missing", "fallback"), "fallback");
    }

    struct Joined(&'static str);

    impl ItemAccessor for Joined {
        fn get(&self, key: &str) -> Option<Cow<'_, str>> {
            (key == "~#rating").then_some(Cow::Borrowed(self.0))
        }
    }

    #[test]
    fn accessors_default_to_splitting_get() {
        let item = Joined("0.5\n0.8");
        assert_eq!(item.list("~#rating"), vec!["0.5", "0.8"]);
        assert!(item.list("title").is_empty());
        assert_eq!(item.numeric("~#rating"), Some(0.5));
        assert_eq!(Joined("n/a").numeric("~#rating"), None);
    }

    #[test]
    fn numbers_come_from_the_first_tag_value() {
        let item = MapItem::new().with_tag("bpm", "120\n90");
        assert_eq!(item.numeric("bpm"), Some(120.0));
    }

    #[test]
    fn leading_number_parsing() {
        assert_eq!(leading_number("12/15"), Some(12.0));
        assert_eq!(leading_number(" -3.5dB"), Some(-3.5));
        assert_eq!(leading_number("abc"), None);
    }

    #[test]
    fn collects_from_pairs() {
        let item: MapItem = [("title", "Quuxly"), ("album", "I Hate: Tests")]
            .into_iter()
            .collect();
        assert_eq!(item.get("title").as_deref(), Some("Quuxly"));
    }
}
