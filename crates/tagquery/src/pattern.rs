//! Compiled text matchers for tag values.
//!
//! Every value form of the query language (`/regex/flags`, `"quoted"`,
//! bare text) compiles to a [`ValueMatcher`] with folding and case
//! handling baked in at parse time.

use std::fmt;

use memchr::memmem;
use regex::{Regex, RegexBuilder};

use crate::diacritic::expand_literal;
use crate::error::{QueryError, Result};

/// Modifiers following a regex or quoted value.
///
/// Without modifiers matching is case-insensitive and accent-folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    /// `c`: exact case, no folding.
    pub case_sensitive: bool,
    /// `i`: ignore case even with `c`.
    pub ignore_case: bool,
    /// `s`: `.` also matches newlines.
    pub dot_all: bool,
    /// `l`: the pattern is plain text.
    pub literal: bool,
    /// `d`: fold accents even with `c`.
    pub fold: bool,
}

impl PatternFlags {
    pub fn parse(modifiers: &str) -> Result<Self> {
        let mut flags = Self::default();
        for modifier in modifiers.chars() {
            match modifier {
                'c' => flags.case_sensitive = true,
                'i' => flags.ignore_case = true,
                's' => flags.dot_all = true,
                'l' => flags.literal = true,
                'd' => flags.fold = true,
                other => {
                    return Err(QueryError::Parse(format!(
                        "unknown pattern modifier {other:?} in {modifiers:?}"
                    )))
                }
            }
        }
        Ok(flags)
    }

    pub fn ignores_case(&self) -> bool {
        !self.case_sensitive || self.ignore_case
    }

    pub fn folds(&self) -> bool {
        !self.case_sensitive || self.fold
    }
}

impl fmt::Display for PatternFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (enabled, modifier) in [
            (self.case_sensitive, 'c'),
            (self.ignore_case, 'i'),
            (self.dot_all, 's'),
            (self.literal, 'l'),
            (self.fold, 'd'),
        ] {
            if enabled {
                write!(f, "{modifier}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Value matcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValueMatcher {
    source: String,
    flags: PatternFlags,
    kind: MatcherKind,
}

#[derive(Debug, Clone)]
enum MatcherKind {
    Regex(Regex),
    Substring(memmem::Finder<'static>),
}

impl ValueMatcher {
    /// Compiles a `/regex/flags` value.
    pub fn regex(pattern: &str, flags: PatternFlags) -> Result<Self> {
        if flags.literal {
            return Self::substring(pattern, flags);
        }
        Ok(Self {
            source: pattern.to_string(),
            flags,
            kind: MatcherKind::Regex(compile_folded(pattern, flags)?),
        })
    }

    /// Compiles a quoted value, which must equal the whole tag value.
    pub fn exact(text: &str, flags: PatternFlags) -> Result<Self> {
        let pattern = if flags.literal {
            regex::escape(text)
        } else {
            format!("^{}$", regex::escape(text))
        };
        let flags = PatternFlags {
            literal: false,
            ..flags
        };
        Ok(Self {
            source: text.to_string(),
            flags,
            kind: MatcherKind::Regex(compile_folded(&pattern, flags)?),
        })
    }

    /// Compiles bare text, matched as a substring.
    pub fn substring(text: &str, flags: PatternFlags) -> Result<Self> {
        let kind = if flags.ignores_case() || flags.folds() {
            MatcherKind::Regex(compile_folded(&regex::escape(text), flags)?)
        } else {
            MatcherKind::Substring(memmem::Finder::new(text.as_bytes()).into_owned())
        };
        Ok(Self {
            source: text.to_string(),
            flags,
            kind,
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        match &self.kind {
            MatcherKind::Regex(regex) => regex.is_match(value),
            MatcherKind::Substring(finder) => finder.find(value.as_bytes()).is_some(),
        }
    }
}

impl fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

/// Builds the regex, first with accent folding when requested.
///
/// Folding that is unsupported for the pattern, or that yields a pattern
/// the regex engine rejects, falls back to the unfolded pattern.
fn compile_folded(pattern: &str, flags: PatternFlags) -> Result<Regex> {
    let build = |source: &str| {
        RegexBuilder::new(source)
            .case_insensitive(flags.ignores_case())
            .multi_line(true)
            .dot_matches_new_line(flags.dot_all)
            .build()
    };

    if flags.folds() {
        match expand_literal(pattern) {
            Ok(expanded) => match build(&expanded) {
                Ok(regex) => return Ok(regex),
                Err(error) => {
                    log::debug!("folded pattern for /{pattern}/ rejected ({error}); compiling unfolded")
                }
            },
            Err(QueryError::UnsupportedPattern(reason)) => {
                log::debug!("cannot fold /{pattern}/ ({reason}); compiling unfolded")
            }
            Err(error) => return Err(error),
        }
    }

    build(pattern).map_err(|error| QueryError::InvalidRegex(format!("/{pattern}/: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers() {
        let flags = PatternFlags::parse("lsic").expect("flags");
        assert!(flags.literal && flags.dot_all && flags.ignore_case && flags.case_sensitive);
        assert!(flags.ignores_case());
        assert!(!flags.folds());
        assert!(PatternFlags::parse("icslx").is_err());
    }

    #[test]
    fn default_is_folded_and_case_insensitive() {
        let matcher = ValueMatcher::regex("i hate", PatternFlags::default()).expect("compile");
        assert!(matcher.is_match("I Hate: Tests"));
        let folded = ValueMatcher::regex("angstrom", PatternFlags::default()).expect("compile");
        assert!(folded.is_match("Ångström"));
    }

    #[test]
    fn case_flag_disables_folding() {
        let flags = PatternFlags::parse("c").expect("flags");
        let matcher = ValueMatcher::regex("angstrom", flags).expect("compile");
        assert!(!matcher.is_match("Ångström"));
        assert!(!matcher.is_match("ANGSTROM"));
        assert!(matcher.is_match("angstrom"));

        let refolded = ValueMatcher::regex("Angstrom", PatternFlags::parse("cd").expect("flags"))
            .expect("compile");
        assert!(refolded.is_match("Ångström"));
    }

    #[test]
    fn exact_match_is_anchored() {
        let matcher = ValueMatcher::exact("piman", PatternFlags::default()).expect("compile");
        assert!(matcher.is_match("PiMan"));
        assert!(!matcher.is_match("pimanx"));
        // Multi-line: any single value of a joined tag.
        assert!(matcher.is_match("mu\npiman"));
    }

    #[test]
    fn literal_flag_escapes_metacharacters() {
        let matcher = ValueMatcher::regex("a.b", PatternFlags::parse("l").expect("flags"))
            .expect("compile");
        assert!(matcher.is_match("xa.by"));
        assert!(!matcher.is_match("axb"));
    }

    #[test]
    fn exact_case_literal_uses_substring_search() {
        let matcher =
            ValueMatcher::substring("Bar", PatternFlags::parse("c").expect("flags")).expect("compile");
        assert!(matches!(matcher.kind, MatcherKind::Substring(_)));
        assert!(matcher.is_match("Foo the Bar"));
        assert!(!matcher.is_match("foo the bar"));
    }

    #[test]
    fn dot_all_flag() {
        let plain = ValueMatcher::regex("a.b", PatternFlags::default()).expect("compile");
        assert!(!plain.is_match("a\nb"));
        let dot_all = ValueMatcher::regex("a.b", PatternFlags::parse("s").expect("flags"))
            .expect("compile");
        assert!(dot_all.is_match("a\nb"));
    }

    #[test]
    fn unfoldable_pattern_falls_back() {
        // Backreferences cannot be folded, and the regex engine rejects them too.
        let error = ValueMatcher::regex(r"(a)\1", PatternFlags::default()).expect_err("invalid");
        assert!(matches!(error, QueryError::InvalidRegex(_)));
    }

    #[test]
    fn invalid_regex_is_reported() {
        let error = ValueMatcher::regex("Sigur [r-zos", PatternFlags::default()).expect_err("invalid");
        assert!(error.is_parse_error());
    }

    #[test]
    fn display_round_trips_source_and_flags() {
        let matcher = ValueMatcher::regex("x", PatternFlags::parse("cs").expect("flags")).expect("compile");
        assert_eq!(matcher.to_string(), "/x/cs");
    }
}
