//! Accent-insensitive rewriting of regular expressions.
//!
//! `expand_literal("Mum")` produces `[MḾṀṂ][uùúûü…][mḿṁṃ]`: every literal
//! letter with accented forms becomes a class holding itself plus those
//! forms, so ASCII input matches decorated metadata while accented input
//! still matches itself. Letter sequences that have a ligature form
//! (`ae`, `ss`, `fi`, …) become `(expanded|ligatures)` groups.
//!
//! The variant table is derived once. Letters come from compatibility
//! decomposition: every letter that decomposes into a base letter followed
//! only by combining marks is a variant of that base, for Latin, Greek and
//! Cyrillic alike. Ligature spellings come from the transliteration data of
//! `deunicode`.

use std::sync::LazyLock;

use fnv::FnvHashMap;
use unicode_normalization::char::{decompose_compatible, is_combining_mark};
use unicode_normalization::UnicodeNormalization;

use crate::error::{QueryError, Result};

const LETTER_BLOCKS: [(u32, u32); 8] = [
    // Latin-1 Supplement, Latin Extended-A and -B
    (0x00C0, 0x024F),
    // Greek and Coptic, Cyrillic
    (0x0370, 0x04FF),
    (0x1E00, 0x1EFF),
    (0x1F00, 0x1FFF),
    (0x2C60, 0x2C7F),
    (0xA720, 0xA7FF),
    (0xAB30, 0xAB6F),
    (0xFB00, 0xFB06),
];

/// Widest class range that is expanded letter by letter.
const MAX_EXPANDED_RANGE: u32 = 0x300;

static VARIANTS: LazyLock<VariantTable> = LazyLock::new(VariantTable::build);

struct VariantTable {
    letters: FnvHashMap<char, String>,
    /// Sorted longest spelling first.
    ligatures: Vec<(Vec<char>, String)>,
}

impl VariantTable {
    fn build() -> Self {
        let mut letters: FnvHashMap<char, Vec<char>> = FnvHashMap::default();
        let mut ligatures: FnvHashMap<String, Vec<char>> = FnvHashMap::default();

        for (start, end) in LETTER_BLOCKS {
            for ch in (start..=end).filter_map(char::from_u32) {
                if !ch.is_alphabetic() {
                    continue;
                }
                if let Some((base, variant)) = decorated_letter(ch) {
                    letters.entry(base).or_default().push(variant);
                } else if let Some(spelling) = ligature_spelling(ch) {
                    ligatures.entry(spelling).or_default().push(ch);
                }
            }
        }

        let letters: FnvHashMap<char, String> = letters
            .into_iter()
            .map(|(base, variants)| (base, sorted_unique(variants)))
            .collect();

        // `ǽ` is a variant of `æ`, so it belongs with the `ae` ligature too.
        let mut ligatures = ligatures
            .into_iter()
            .map(|(spelling, forms)| {
                let mut all = forms.clone();
                for form in forms {
                    if let Some(variants) = letters.get(&form) {
                        all.extend(variants.chars());
                    }
                }
                (spelling.chars().collect::<Vec<_>>(), sorted_unique(all))
            })
            .collect::<Vec<_>>();
        ligatures.sort_by(|(left, _), (right, _)| right.len().cmp(&left.len()).then(left.cmp(right)));

        Self { letters, ligatures }
    }

    fn variants(&self, ch: char) -> Option<&str> {
        self.letters.get(&ch).map(String::as_str)
    }
}

/// Splits a letter into its base and its composed form when it is a base
/// letter followed only by combining marks (`ά` is `α` + U+0301).
fn decorated_letter(ch: char) -> Option<(char, char)> {
    let mut parts = Vec::with_capacity(4);
    decompose_compatible(ch, |part| parts.push(part));
    let (&base, marks) = parts.split_first()?;
    if marks.is_empty() || !base.is_alphabetic() || !marks.iter().all(|&mark| is_combining_mark(mark)) {
        return None;
    }
    let mut composed = parts.iter().copied().nfkc();
    match (composed.next(), composed.next()) {
        (Some(single), None) => Some((base, single)),
        _ => Some((base, ch)),
    }
}

/// ASCII spelling of a ligature letter (`æ` is `ae`, `ß` is `ss`).
fn ligature_spelling(ch: char) -> Option<String> {
    let ascii = deunicode::deunicode_char(ch)?;
    let letters_only = ascii.bytes().all(|byte| byte.is_ascii_alphabetic());
    (letters_only && (2..=3).contains(&ascii.len())).then(|| ascii.to_string())
}

fn sorted_unique(mut chars: Vec<char>) -> String {
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

/// Rewrites `pattern` so that its literal letters also match their
/// accented variants.
///
/// Returns [`QueryError::UnsupportedPattern`] for backreferences, which
/// cannot be rewritten without changing what they refer to.
pub fn expand_literal(pattern: &str) -> Result<String> {
    Expander::new(pattern, &VARIANTS).run()
}

// ---------------------------------------------------------------------------
// Pattern rewriter
// ---------------------------------------------------------------------------

struct Expander<'a> {
    chars: Vec<char>,
    index: usize,
    output: String,
    literals: Vec<char>,
    table: &'a VariantTable,
}

impl<'a> Expander<'a> {
    fn new(pattern: &str, table: &'a VariantTable) -> Self {
        Self {
            chars: pattern.chars().collect(),
            index: 0,
            output: String::with_capacity(pattern.len() * 4),
            literals: Vec::new(),
            table,
        }
    }

    fn run(mut self) -> Result<String> {
        while let Some(ch) = self.peek() {
            match ch {
                '\\' => {
                    self.flush_literals();
                    self.copy_escape()?;
                }
                '[' => {
                    self.flush_literals();
                    self.copy_class()?;
                }
                '(' => {
                    self.flush_literals();
                    self.copy_group_open()?;
                }
                '*' | '+' | '?' | '{' => {
                    // A quantifier binds to the last literal only.
                    if let Some(last) = self.literals.pop() {
                        self.flush_literals();
                        self.push_literal(last, false);
                    }
                    self.copy_quantifier();
                }
                '.' | '^' | '$' | '|' | ')' => {
                    self.flush_literals();
                    self.output.push(ch);
                    self.index += 1;
                }
                _ => {
                    self.literals.push(ch);
                    self.index += 1;
                }
            }
        }
        self.flush_literals();
        Ok(self.output)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn copy_one(&mut self) {
        if let Some(ch) = self.peek() {
            self.output.push(ch);
            self.index += 1;
        }
    }

    fn copy_through(&mut self, close: char) {
        while let Some(ch) = self.peek() {
            self.copy_one();
            if ch == close {
                break;
            }
        }
    }

    fn copy_escape(&mut self) -> Result<()> {
        self.copy_one();
        let Some(next) = self.peek() else {
            return Ok(());
        };
        match next {
            '1'..='9' => Err(QueryError::UnsupportedPattern(format!(
                "backreference \\{next}"
            ))),
            'k' if self.peek_at(1) == Some('<') => Err(QueryError::UnsupportedPattern(
                "named backreference".to_string(),
            )),
            'x' | 'u' | 'U' | 'p' | 'P' if self.peek_at(1) == Some('{') => {
                self.copy_through('}');
                Ok(())
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                self.copy_one();
                for _ in 0..width {
                    if !self.peek().is_some_and(|ch| ch.is_ascii_hexdigit()) {
                        break;
                    }
                    self.copy_one();
                }
                Ok(())
            }
            'p' | 'P' => {
                self.copy_one();
                self.copy_one();
                Ok(())
            }
            _ => {
                self.copy_one();
                Ok(())
            }
        }
    }

    fn copy_group_open(&mut self) -> Result<()> {
        self.copy_one();
        if self.peek() != Some('?') {
            return Ok(());
        }
        match (self.peek_at(1), self.peek_at(2)) {
            (Some('P'), Some('=')) => Err(QueryError::UnsupportedPattern(
                "named backreference".to_string(),
            )),
            (Some('P'), Some('<')) => {
                self.copy_through('>');
                Ok(())
            }
            (Some('<'), Some(next)) if next != '=' && next != '!' => {
                self.copy_through('>');
                Ok(())
            }
            _ => {
                // Inline flags such as `(?i)` or `(?s:`.
                self.copy_one();
                while self
                    .peek()
                    .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '-')
                {
                    self.copy_one();
                }
                if matches!(self.peek(), Some(':' | ')')) {
                    self.copy_one();
                }
                Ok(())
            }
        }
    }

    fn copy_quantifier(&mut self) {
        if self.peek() == Some('{') {
            self.copy_through('}');
        } else {
            self.copy_one();
        }
    }

    /// Copies a bracket class, nested classes included, expanding the
    /// letters and ranges inside it.
    fn copy_class(&mut self) -> Result<()> {
        let mut depth = 0usize;
        self.open_class();
        depth += 1;

        while let Some(ch) = self.peek() {
            match ch {
                ']' => {
                    self.copy_one();
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                '[' if self.peek_at(1) == Some(':') => {
                    self.copy_one();
                    self.copy_through(']');
                }
                '[' => {
                    self.open_class();
                    depth += 1;
                }
                '\\' => self.copy_escape()?,
                '&' | '-' | '~' if self.peek_at(1) == Some(ch) => {
                    self.copy_one();
                    self.copy_one();
                }
                _ => {
                    self.index += 1;
                    match (self.peek(), self.peek_at(1)) {
                        (Some('-'), Some(end)) if !matches!(end, ']' | '[' | '\\') => {
                            self.index += 2;
                            self.push_range(ch, end);
                        }
                        _ => self.push_literal(ch, true),
                    }
                }
            }
        }
        // Unterminated class; the regex compiler reports it.
        Ok(())
    }

    /// Copies `[`, a negation and a leading literal `]`.
    fn open_class(&mut self) {
        self.copy_one();
        if self.peek() == Some('^') {
            self.copy_one();
        }
        if self.peek() == Some(']') {
            self.copy_one();
        }
    }

    fn push_range(&mut self, start: char, end: char) {
        if start <= end && (end as u32) - (start as u32) <= MAX_EXPANDED_RANGE {
            let table = self.table;
            for ch in start..=end {
                if let Some(variants) = table.variants(ch) {
                    self.output.push_str(variants);
                }
            }
        }
        self.output.push(start);
        self.output.push('-');
        self.output.push(end);
    }

    fn push_literal(&mut self, ch: char, in_class: bool) {
        match self.table.variants(ch) {
            Some(variants) if in_class => {
                self.output.push(ch);
                self.output.push_str(variants);
            }
            Some(variants) => {
                self.output.push('[');
                self.output.push(ch);
                self.output.push_str(variants);
                self.output.push(']');
            }
            None => self.output.push(ch),
        }
    }

    fn flush_literals(&mut self) {
        if self.literals.is_empty() {
            return;
        }
        let run = std::mem::take(&mut self.literals);
        let table = self.table;
        let mut index = 0;
        while index < run.len() {
            let rest = &run[index..];
            let ligature = table
                .ligatures
                .iter()
                .find(|(spelling, _)| rest.starts_with(spelling));
            match ligature {
                Some((spelling, forms)) => {
                    self.output.push('(');
                    for &ch in spelling {
                        self.push_literal(ch, false);
                    }
                    self.output.push('|');
                    if forms.chars().count() > 1 {
                        self.output.push('[');
                        self.output.push_str(forms);
                        self.output.push(']');
                    } else {
                        self.output.push_str(forms);
                    }
                    self.output.push(')');
                    index += spelling.len();
                }
                None => {
                    self.push_literal(run[index], false);
                    index += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;

    fn folded(pattern: &str) -> regex::Regex {
        let expanded = expand_literal(pattern).expect("expand");
        RegexBuilder::new(&expanded)
            .case_insensitive(true)
            .build()
            .expect("compile")
    }

    #[test]
    fn ascii_letters_match_accented_forms() {
        let re = folded("angstrom");
        assert!(re.is_match("Ångström"));
        assert!(re.is_match("angstrom"));
        assert!(!re.is_match("angstr0m"));
    }

    #[test]
    fn accented_pattern_still_matches_itself() {
        let re = folded("Ångström");
        assert!(re.is_match("Ångström"));
        assert!(!re.is_match("Angstrom"), "folding is asymmetric");
    }

    #[test]
    fn letter_expands_to_class() {
        let expanded = expand_literal("u").expect("expand");
        assert!(expanded.starts_with("[u"));
        assert!(expanded.contains('ü'));
        assert!(expanded.ends_with(']'));
    }

    #[test]
    fn greek_and_cyrillic_letters_fold() {
        let alpha = expand_literal("α").expect("expand");
        assert!(alpha.contains('ά'), "{alpha}");
        assert!(folded("αθηνα").is_match("Αθηνά"));
        assert!(folded("елка").is_match("Ёлка"));
        assert!(!folded("Ёлка").is_match("елка"), "folding is asymmetric");
    }

    #[test]
    fn undecomposable_letters_are_left_alone() {
        // `ø` and `ł` have no canonical decomposition.
        assert!(!folded("lodz").is_match("łodz"));
        assert!(!folded("o").is_match("ø"));
    }

    #[test]
    fn deeply_nested_classes_do_not_recurse() {
        let pattern = format!("{}a{}", "[".repeat(50_000), "]".repeat(50_000));
        let expanded = expand_literal(&pattern).expect("expand");
        assert!(expanded.starts_with("[[["));
        assert!(expanded.contains('á'));
    }

    #[test]
    fn ligatures_expand_to_alternation() {
        assert!(folded("strasse").is_match("Straße"));
        assert!(folded("aeon").is_match("æon"));
        assert!(folded("aeon").is_match("aeon"));
        assert!(folded("fine").is_match("ﬁne"));
    }

    #[test]
    fn quantifier_binds_to_last_letter() {
        let re = folded("^as+$");
        assert!(re.is_match("asss"));
        assert!(!re.is_match("asas"));
    }

    #[test]
    fn classes_and_ranges_are_expanded() {
        let re = folded("^[a-c]$");
        assert!(re.is_match("á"));
        assert!(re.is_match("b"));
        assert!(!re.is_match("d"));

        let negated = folded("^[^e]$");
        assert!(!negated.is_match("é"));
        assert!(negated.is_match("x"));
    }

    #[test]
    fn metacharacters_pass_through() {
        assert_eq!(expand_literal(r"\d+\s*").expect("expand"), r"\d+\s*");
        assert_eq!(expand_literal("1.2|3$").expect("expand"), "1.2|3$");
        assert_eq!(expand_literal(r"\p{L}\x41").expect("expand"), r"\p{L}\x41");
        assert_eq!(expand_literal("(?:12){2,3}").expect("expand"), "(?:12){2,3}");
    }

    #[test]
    fn inline_flags_are_not_expanded() {
        let expanded = expand_literal("(?i)x").expect("expand");
        assert!(expanded.starts_with("(?i)"));
    }

    #[test]
    fn backreferences_are_unsupported() {
        assert!(matches!(
            expand_literal(r"(a)\1"),
            Err(QueryError::UnsupportedPattern(_))
        ));
        assert!(matches!(
            expand_literal(r"(?P<x>a)(?P=x)"),
            Err(QueryError::UnsupportedPattern(_))
        ));
        assert!(matches!(
            expand_literal(r"(?<x>a)\k<x>"),
            Err(QueryError::UnsupportedPattern(_))
        ));
    }

    #[test]
    fn named_groups_keep_their_names() {
        let expanded = expand_literal("(?P<name>a)").expect("expand");
        assert!(expanded.starts_with("(?P<name>["));
    }

    #[test]
    fn table_is_self_consistent() {
        let table = &*VARIANTS;
        let variants = table.variants('e').expect("e has variants");
        assert!(variants.contains('é'));
        assert!(!variants.contains('e'));
        assert!(table
            .ligatures
            .iter()
            .any(|(spelling, forms)| spelling == &['s', 's'] && forms.contains('ß')));
    }
}
