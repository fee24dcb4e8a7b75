//! Query parser.
//!
//! A recursive-descent parser over the raw query text with single-character
//! lookahead and explicit backtracking. Text that does not parse under the
//! strict grammar (and uses no tag or numeric syntax) is retried as free text,
//! split on whitespace and searched in the star tags.

use std::fmt;

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::extension::ExtensionRegistry;
use crate::node::{MatchNode, TagMatch, ValueNode};
use crate::numexpr::{self, BinaryOp, CompareOp, NumExpr, NumericComparison, NumericTag, Unit};
use crate::pattern::{PatternFlags, ValueMatcher};

/// How a successfully compiled query was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Parsed by the strict grammar.
    Explicit,
    /// Parsed as whitespace separated free text.
    FreeText,
}

/// Compiles query text into a match tree.
///
/// Empty or whitespace-only text matches everything.
pub fn compile(
    text: &str,
    star: &[String],
    config: &QueryConfig,
    extensions: &ExtensionRegistry,
) -> Result<(MatchNode, ParseMode)> {
    if text.trim().is_empty() {
        return Ok((MatchNode::True, ParseMode::Explicit));
    }

    let mut parser = QueryParser::new(text, star, config, extensions);
    match parser.parse() {
        Ok(node) => Ok((node, ParseMode::Explicit)),
        Err(error) if !error.is_parse_error() || has_explicit_syntax(text) => Err(error),
        Err(error) => {
            log::debug!("query {text:?} is not explicit ({error}); searching as free text");
            let parser = QueryParser::new(text, star, config, extensions);
            Ok((parser.parse_free_text()?, ParseMode::FreeText))
        }
    }
}

fn decode_code_point(digits: &str, radix: u32) -> Option<char> {
    u32::from_str_radix(digits, radix).ok().and_then(char::from_u32)
}

fn has_explicit_syntax(text: &str) -> bool {
    text.contains('=') || text.contains("#(") || text.contains("@(")
}

// ---------------------------------------------------------------------------
// Query parser
// ---------------------------------------------------------------------------

/// Deepest nesting of groups, negations and parentheses a query may use.
pub const MAX_NESTING: usize = 256;

pub struct QueryParser<'a> {
    input: &'a str,
    index: usize,
    depth: usize,
    star: &'a [String],
    config: &'a QueryConfig,
    extensions: &'a ExtensionRegistry,
}

impl<'a> QueryParser<'a> {
    pub fn new(
        input: &'a str,
        star: &'a [String],
        config: &'a QueryConfig,
        extensions: &'a ExtensionRegistry,
    ) -> Self {
        Self {
            input,
            index: 0,
            depth: 0,
            star,
            config,
            extensions,
        }
    }

    /// Parses the whole input with the strict grammar.
    pub fn parse(&mut self) -> Result<MatchNode> {
        let node = self.parse_query(true)?;
        self.skip_spaces();
        if !self.is_end() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(node)
    }

    fn parse_query(&mut self, outer: bool) -> Result<MatchNode> {
        self.skip_spaces();
        if self.is_end() {
            return Ok(MatchNode::True);
        }
        if let Some(negated) = self.accept_negations() {
            let inner = self.nested(|p| p.parse_query(false))?;
            return Ok(if negated { MatchNode::negate(inner) } else { inner });
        }
        if self.accept("&") {
            let children = self.nested(|p| p.parse_list(|p| p.parse_query(false)))?;
            return Ok(MatchNode::inter(children));
        }
        if self.accept("|") {
            let children = self.nested(|p| p.parse_list(|p| p.parse_query(false)))?;
            return Ok(MatchNode::union(children));
        }
        if self.accept("#") {
            return Ok(MatchNode::inter(self.parse_list(Self::parse_comparison)?));
        }
        if self.accept("@") {
            return self.parse_extension();
        }
        if let Some(node) = self.parse_tag_match()? {
            return Ok(node);
        }
        let value = self.parse_value(outer)?;
        Ok(tag_node(self.star, &value))
    }

    /// `(rule, rule, ...)`; at least one element.
    fn parse_list<T>(&mut self, mut rule: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        self.expect("(")?;
        let mut items = vec![rule(self)?];
        while self.accept(",") {
            items.push(rule(self)?);
        }
        self.expect(")")?;
        Ok(items)
    }

    /// `tag[, tag...] = value` or `tag != value`. Backtracks and returns
    /// `None` when the input is not a tag match; fails once `=` was seen.
    fn parse_tag_match(&mut self) -> Result<Option<MatchNode>> {
        let start = self.index;
        let Some(names) = self.parse_tag_list() else {
            self.index = start;
            return Ok(None);
        };
        let negated = if self.accept("!=") {
            true
        } else if self.accept("=") {
            false
        } else {
            self.index = start;
            return Ok(None);
        };

        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            let key = self.config.resolve_tag(name);
            if key.starts_with("~#") {
                return Err(QueryError::Parse(format!(
                    "numeric tag {key} cannot be matched as text; use #(...)"
                )));
            }
            keys.push(key);
        }

        let node = tag_node(&keys, &self.parse_value(false)?);
        Ok(Some(if negated {
            MatchNode::negate(node)
        } else {
            node
        }))
    }

    fn parse_tag_list(&mut self) -> Option<Vec<&'a str>> {
        let mut names = Vec::new();
        loop {
            self.skip_spaces();
            let name = self.take_while(is_tag_char).trim();
            if name.is_empty() {
                return None;
            }
            names.push(name);
            if !self.accept(",") {
                return Some(names);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    fn parse_value(&mut self, outer: bool) -> Result<ValueNode> {
        if self.accept("/") {
            let source = self.read_regex()?;
            let flags = self.parse_modifiers()?;
            return Ok(ValueNode::Pattern(ValueMatcher::regex(&source, flags)?));
        }
        for quote in ['"', '\''] {
            if self.accept_char(quote) {
                let text = self.read_quoted(quote)?;
                let flags = self.parse_modifiers()?;
                return Ok(ValueNode::Pattern(ValueMatcher::exact(&text, flags)?));
            }
        }
        if let Some(negated) = self.accept_negations() {
            let inner = self.nested(|p| p.parse_value(false))?;
            return Ok(if negated { ValueNode::negate(inner) } else { inner });
        }
        if self.accept("|") {
            let children = self.nested(|p| p.parse_list(|p| p.parse_value(false)))?;
            return Ok(ValueNode::Union(children));
        }
        if self.accept("&") {
            let children = self.nested(|p| p.parse_list(|p| p.parse_value(false)))?;
            return Ok(ValueNode::Inter(children));
        }
        if outer {
            return Err(self.error("free text is not allowed at the top level of a query"));
        }

        let text = self.take_while(|ch| ch != ',' && ch != ')').trim();
        if text.is_empty() {
            return Err(self.error("expected a value"));
        }
        Ok(ValueNode::Pattern(ValueMatcher::substring(
            &self.config.strip_ignored(text),
            PatternFlags::default(),
        )?))
    }

    /// Reads a regex body after the opening `/`; `\/` becomes `/`.
    fn read_regex(&mut self) -> Result<String> {
        let start = self.index;
        let mut source = String::new();
        while let Some(ch) = self.bump() {
            match ch {
                '/' => return Ok(source),
                '\\' => match self.bump() {
                    Some('/') => source.push('/'),
                    Some(escaped) => {
                        source.push('\\');
                        source.push(escaped);
                    }
                    None => break,
                },
                other => source.push(other),
            }
        }
        self.index = start;
        Err(self.error("unterminated regular expression"))
    }

    fn read_quoted(&mut self, quote: char) -> Result<String> {
        let start = self.index;
        let mut text = String::new();
        while let Some(ch) = self.bump() {
            if ch == quote {
                return Ok(text);
            }
            if ch != '\\' {
                text.push(ch);
                continue;
            }
            match self.bump() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some('a') => text.push('\x07'),
                Some('b') => text.push('\x08'),
                Some('f') => text.push('\x0c'),
                Some('v') => text.push('\x0b'),
                Some('\n') => {}
                Some(escaped @ ('\\' | '"' | '\'')) => text.push(escaped),
                Some('x') => {
                    let digits = self.take_up_to(2, |ch| ch.is_ascii_hexdigit());
                    match decode_code_point(digits, 16).filter(|_| digits.len() == 2) {
                        Some(decoded) => text.push(decoded),
                        None => return Err(self.error("invalid \\x escape in quoted string")),
                    }
                }
                Some('0'..='7') => {
                    let first = self.index - 1;
                    self.take_up_to(2, |ch| ch.is_digit(8));
                    if let Some(decoded) = decode_code_point(&self.input[first..self.index], 8) {
                        text.push(decoded);
                    }
                }
                Some(other) => {
                    text.push('\\');
                    text.push(other);
                }
                None => break,
            }
        }
        self.index = start;
        Err(self.error(format!("unterminated {quote}-quoted string")))
    }

    fn parse_modifiers(&mut self) -> Result<PatternFlags> {
        let start = self.index;
        let modifiers = self.take_while(|ch| ch.is_ascii_alphabetic());
        PatternFlags::parse(modifiers).map_err(|error| match error {
            QueryError::Parse(message) => {
                self.index = start;
                self.error(message)
            }
            other => other,
        })
    }

    // -----------------------------------------------------------------------
    // Numeric comparisons
    // -----------------------------------------------------------------------

    fn parse_comparison(&mut self) -> Result<MatchNode> {
        let mut operands = vec![self.parse_sum(true)?];
        let mut ops = Vec::new();
        while let Some(op) = self.accept_compare_op() {
            ops.push(op);
            operands.push(self.parse_sum(true)?);
        }
        if ops.is_empty() {
            return Err(self.error("expected a relational operator in numeric comparison"));
        }
        let comparison =
            NumericComparison::new(operands, ops, self.config.almost_equal_epsilon)?;
        Ok(MatchNode::NumCmp(comparison))
    }

    fn accept_compare_op(&mut self) -> Option<CompareOp> {
        self.skip_spaces();
        let rest = self.rest();
        let (symbol, op) = CompareOp::SYMBOLS
            .into_iter()
            .find(|(symbol, _)| rest.starts_with(symbol))?;
        self.index += symbol.len();
        Some(op)
    }

    /// Each operator of a chain deepens the left spine of the tree, so a
    /// chain counts towards the nesting limit while it is parsed.
    fn parse_sum(&mut self, allow_date: bool) -> Result<NumExpr> {
        let outer_depth = self.depth;
        let mut left = self.parse_product(allow_date)?;
        loop {
            let op = if self.accept("+") {
                BinaryOp::Add
            } else if self.accept("-") {
                BinaryOp::Sub
            } else {
                self.depth = outer_depth;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_product(false)?;
            left = binary(op, left, right);
        }
    }

    fn parse_product(&mut self, allow_date: bool) -> Result<NumExpr> {
        let outer_depth = self.depth;
        let mut left = self.parse_unary(allow_date)?;
        loop {
            let op = if self.accept("*") {
                BinaryOp::Mul
            } else if self.accept("/") {
                BinaryOp::Div
            } else {
                self.depth = outer_depth;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_unary(false)?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self, allow_date: bool) -> Result<NumExpr> {
        let mut signs = 0usize;
        while self.accept("-") {
            signs += 1;
        }
        if signs == 0 {
            return self.parse_atom(allow_date);
        }
        let inner = self.parse_atom(false)?;
        Ok(if signs % 2 == 1 {
            NumExpr::Negate(Box::new(inner))
        } else {
            inner
        })
    }

    fn parse_atom(&mut self, allow_date: bool) -> Result<NumExpr> {
        if self.accept("(") {
            let inner = self.nested(|p| p.parse_sum(true))?;
            self.expect(")")?;
            return Ok(inner);
        }
        self.skip_spaces();
        if allow_date {
            if let Some(date) = self.parse_date() {
                return Ok(date);
            }
        }
        if self.peek_char().is_some_and(|ch| ch.is_ascii_digit()) {
            return self.parse_number();
        }

        let start = self.index;
        let name = self.take_while(is_tag_char).trim();
        match name.to_lowercase().as_str() {
            "" => {
                self.index = start;
                Err(self.error("expected a number or tag name"))
            }
            "now" => Ok(NumExpr::Now),
            "today" => Ok(NumExpr::Today),
            _ => Ok(NumExpr::Tag(NumericTag::new(name, self.config))),
        }
    }

    /// `YYYY[-M[M][-D[D]]]`, read as both a date and the arithmetic it
    /// spells. Not a date when followed by a unit word, `:` or a decimal.
    fn parse_date(&mut self) -> Option<NumExpr> {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let digit_run = |from: usize| {
            bytes
                .get(from..)
                .map_or(0, |tail| tail.iter().take_while(|b| b.is_ascii_digit()).count())
        };
        if digit_run(0) != 4 {
            return None;
        }
        let mut end = 4;
        let mut fields = 1;
        while fields < 3 && bytes.get(end) == Some(&b'-') {
            let run = digit_run(end + 1);
            if run == 0 || run > 2 {
                break;
            }
            end += 1 + run;
            fields += 1;
        }

        let literal = &rest[..end];
        let next = rest[end..].trim_start().chars().next();
        if next.is_some_and(|ch| ch.is_alphabetic() || ch == ':' || ch == '.') {
            return None;
        }

        let values: Vec<f64> = literal
            .split('-')
            .filter_map(|field| field.parse().ok())
            .collect();
        let (first, others) = values.split_first()?;
        let number = others.iter().fold(*first, |total, field| total - field);
        self.index += end;

        Some(match numexpr::parse_date_literal(literal) {
            Some(date) => NumExpr::NumberOrDate { number, date },
            None => NumExpr::Number {
                value: number,
                unit: None,
            },
        })
    }

    fn parse_number(&mut self) -> Result<NumExpr> {
        let start = self.index;
        let mut text = self.take_while(|ch| ch.is_ascii_digit()).to_string();
        let rest = self.rest();
        if rest.starts_with('.') && rest[1..].starts_with(|ch: char| ch.is_ascii_digit()) {
            self.index += 1;
            text.push('.');
            text.push_str(self.take_while(|ch| ch.is_ascii_digit()));
        }
        let mut value: f64 = text.parse().map_err(|_| {
            self.index = start;
            self.error("malformed number")
        })?;

        // 3:44 or 1:02:03
        if self.accept(":") {
            value = value * 60.0 + self.parse_time_field()?;
            if self.accept(":") {
                value = value * 60.0 + self.parse_time_field()?;
            }
            return Ok(NumExpr::Number {
                value,
                unit: Some(Unit::Seconds),
            });
        }

        let checkpoint = self.index;
        self.skip_spaces();
        let word = self.take_while(|ch| ch.is_alphabetic());
        if word.is_empty() {
            self.index = checkpoint;
            return Ok(NumExpr::Number { value, unit: None });
        }
        let Some((multiplier, unit)) = numexpr::unit_multiplier(word) else {
            self.index = checkpoint;
            self.skip_spaces();
            return Err(self.error(format!("unknown unit {word:?}")));
        };

        let after_unit = self.index;
        self.skip_spaces();
        if !self.take_while(|ch| ch.is_alphabetic()).eq_ignore_ascii_case("ago") {
            self.index = after_unit;
        }
        Ok(NumExpr::Number {
            value: value * multiplier,
            unit: Some(unit),
        })
    }

    fn parse_time_field(&mut self) -> Result<f64> {
        self.skip_spaces();
        let digits = self.take_while(|ch| ch.is_ascii_digit());
        digits
            .parse()
            .map_err(|_| self.error("expected digits in time value"))
    }

    // -----------------------------------------------------------------------
    // Extensions
    // -----------------------------------------------------------------------

    fn parse_extension(&mut self) -> Result<MatchNode> {
        self.expect("(")?;
        self.skip_spaces();
        let start = self.index;
        let name = self.take_while(|ch| ch.is_alphanumeric() || ch == '_');
        if name.is_empty() {
            return Err(self.error("expected an extension name"));
        }
        let body = if self.accept(":") {
            Some(self.parse_extension_body()?)
        } else {
            None
        };
        self.expect(")")?;

        match self.extensions.resolve(name, body) {
            Ok(call) => Ok(MatchNode::Extension(call)),
            Err(QueryError::UnknownExtension(name)) => Err(QueryError::UnknownExtension(
                format!("{name} near byte {start}"),
            )),
            Err(error) => Err(error),
        }
    }

    /// Raw text up to the matching `)`. Nested parentheses must balance;
    /// `\(`, `\)` and `\\` are unescaped.
    fn parse_extension_body(&mut self) -> Result<String> {
        let start = self.index;
        let mut body = String::new();
        let mut depth = 0usize;
        loop {
            let Some(ch) = self.peek_char() else {
                self.index = start;
                return Err(self.error("unterminated extension body"));
            };
            if ch == ')' && depth == 0 {
                return Ok(body.trim().to_string());
            }
            self.bump();
            match ch {
                '(' => {
                    depth += 1;
                    body.push(ch);
                }
                ')' => {
                    depth -= 1;
                    body.push(ch);
                }
                '\\' => match self.bump() {
                    Some(escaped @ ('(' | ')' | '\\')) => body.push(escaped),
                    Some(other) => {
                        body.push('\\');
                        body.push(other);
                    }
                    None => {}
                },
                other => body.push(other),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Free text
    // -----------------------------------------------------------------------

    /// Intersects one star-tag search per whitespace separated token.
    pub fn parse_free_text(&self) -> Result<MatchNode> {
        let nodes = split_free_text(self.input)
            .into_iter()
            .map(|token| self.free_text_token(token))
            .collect::<Result<Vec<_>>>()?;
        Ok(MatchNode::inter(nodes))
    }

    fn free_text_token(&self, token: &'a str) -> Result<MatchNode> {
        let stripped = token.trim_start_matches('!');
        if stripped.is_empty() {
            let literal = ValueMatcher::substring(token, PatternFlags::default())?;
            return Ok(tag_node(self.star, &ValueNode::Pattern(literal)));
        }
        let negated = (token.len() - stripped.len()) % 2 == 1;
        // Words made only of ignored characters constrain nothing.
        if self.config.strip_ignored(stripped).is_empty() {
            return Ok(MatchNode::True);
        }

        let value = match self.parse_token_value(stripped) {
            Ok(value) => value,
            // A well-formed regex the engine rejects is searched literally.
            Err(error @ QueryError::InvalidRegex(_)) => {
                log::debug!("searching {stripped:?} literally: {error}");
                ValueNode::Pattern(ValueMatcher::substring(stripped, PatternFlags::default())?)
            }
            Err(error) if starts_with_syntax(stripped) => return Err(error),
            Err(_) => ValueNode::Pattern(ValueMatcher::substring(
                &self.config.strip_ignored(stripped),
                PatternFlags::default(),
            )?),
        };
        let node = tag_node(self.star, &value);
        Ok(if negated {
            MatchNode::negate(node)
        } else {
            node
        })
    }

    fn parse_token_value(&self, token: &'a str) -> Result<ValueNode> {
        let mut parser = QueryParser {
            input: token,
            index: 0,
            ..*self
        };
        let value = parser.parse_value(false)?;
        parser.skip_spaces();
        if !parser.is_end() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Scanning helpers
    // -----------------------------------------------------------------------

    fn rest(&self) -> &'a str {
        &self.input[self.index..]
    }

    fn is_end(&self) -> bool {
        self.index >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.index += ch.len_utf8();
        Some(ch)
    }

    fn skip_spaces(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|ch: char| !predicate(ch)).unwrap_or(rest.len());
        self.index += len;
        &rest[..len]
    }

    /// Consumes at most `limit` leading characters that satisfy `predicate`.
    fn take_up_to(&mut self, limit: usize, predicate: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .take(limit)
            .take_while(|&(_, ch)| predicate(ch))
            .last()
            .map_or(0, |(at, ch)| at + ch.len_utf8());
        self.index += len;
        &rest[..len]
    }

    fn accept(&mut self, token: &str) -> bool {
        self.skip_spaces();
        if self.rest().starts_with(token) {
            self.index += token.len();
            return true;
        }
        false
    }

    fn accept_char(&mut self, ch: char) -> bool {
        self.skip_spaces();
        if self.peek_char() == Some(ch) {
            self.index += ch.len_utf8();
            return true;
        }
        false
    }

    /// Consumes a run of `!`; `Some(true)` when its length is odd.
    fn accept_negations(&mut self) -> Option<bool> {
        let mut negated = None;
        while self.accept("!") {
            negated = Some(!negated.unwrap_or(false));
        }
        negated
    }

    /// Runs `rule` one nesting level deeper.
    fn nested<T>(&mut self, rule: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend()?;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "query nested too deeply (more than {MAX_NESTING} levels)"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.accept(token) {
            return Ok(());
        }
        Err(self.error(format!("expected '{token}'")))
    }

    fn error(&self, message: impl fmt::Display) -> QueryError {
        let snippet: String = self.rest().chars().take(16).collect();
        if snippet.is_empty() {
            QueryError::Parse(format!("{message} at end of query"))
        } else {
            QueryError::Parse(format!(
                "{message} near byte {} ({snippet:?})",
                self.index
            ))
        }
    }
}

fn tag_node(keys: &[String], value: &ValueNode) -> MatchNode {
    MatchNode::union(
        keys.iter()
            .map(|key| MatchNode::Tag(TagMatch::new(key.clone(), value.clone()))),
    )
}

fn binary(op: BinaryOp, left: NumExpr, right: NumExpr) -> NumExpr {
    NumExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn is_tag_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch.is_whitespace() || matches!(ch, '_' | '~' | ':')
}

fn starts_with_syntax(token: &str) -> bool {
    ["/", "\"", "'", "|(", "&("]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Splits on whitespace outside quotes, regexes and parentheses. Quote and
/// slash characters open a literal only at the start of a token or right
/// after `(`, `,` or `!`.
fn split_free_text(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut previous: Option<char> = None;

    for (index, ch) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
        } else if ch.is_whitespace() {
            if depth == 0 {
                if let Some(from) = start.take() {
                    tokens.push(&text[from..index]);
                }
                previous = None;
                continue;
            }
        } else {
            let opens_literal = start.is_none() || matches!(previous, Some('(' | ',' | '!'));
            match ch {
                '"' | '\'' | '/' if opens_literal => quote = Some(ch),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        if start.is_none() {
            start = Some(index);
        }
        if !ch.is_whitespace() {
            previous = Some(ch);
        }
    }
    if let Some(from) = start {
        tokens.push(&text[from..]);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemAccessor, MapItem};

    fn star() -> Vec<String> {
        vec!["artist".to_string(), "title".to_string()]
    }

    fn parse(text: &str) -> Result<(MatchNode, ParseMode)> {
        compile(text, &star(), QueryConfig::global(), &ExtensionRegistry::new())
    }

    fn mode(text: &str) -> Option<ParseMode> {
        parse(text).ok().map(|(_, mode)| mode)
    }

    fn matches(text: &str, item: &dyn ItemAccessor) -> bool {
        parse(text).expect("parse").0.search(item)
    }

    #[test]
    fn empty_matches_everything() {
        let (node, mode) = parse("   ").expect("parse");
        assert!(node.is_true());
        assert_eq!(mode, ParseMode::Explicit);
    }

    #[test]
    fn strict_and_free_text_modes() {
        assert_eq!(mode("a = /b/"), Some(ParseMode::Explicit));
        assert_eq!(mode("/abc/"), Some(ParseMode::Explicit));
        assert_eq!(mode("!x"), Some(ParseMode::Explicit));
        assert_eq!(mode("!&(abc, def)"), Some(ParseMode::Explicit));
        assert_eq!(mode("a test"), Some(ParseMode::FreeText));
        assert_eq!(mode("a = /w"), None);
        assert_eq!(mode("|(sa#"), None);
    }

    #[test]
    fn empty_groups_are_errors() {
        for text in ["&()", "|()", "a = &()", "a = |()"] {
            assert!(parse(text).is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn errors_carry_position() {
        let error = parse("t = /an re/)").expect_err("trailing paren");
        assert!(
            error.to_string().contains("near byte 11"),
            "unexpected message: {error}"
        );
    }

    #[test]
    fn quoted_escapes() {
        let item = MapItem::new()
            .with_tag("title", "x\ry")
            .with_tag("artist", "Ab")
            .with_tag("album", "a\tb\u{7}");
        assert!(matches(r#"title = "x\ry""#, &item));
        assert!(matches(r#"artist = "\x41b"c"#, &item));
        assert!(matches(r#"artist = "\101\142"c"#, &item));
        assert!(matches(r#"album = "a\11b\a""#, &item));
        assert!(matches("artist = \"A\\\nb\"", &item));
        assert!(parse(r#"artist = "\xZ1""#).is_err());
        assert!(parse(r#"artist = "\x4""#).is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let groups = |depth: usize| format!("{}x{}", "|(".repeat(depth), ")".repeat(depth));
        assert_eq!(mode(&groups(MAX_NESTING)), Some(ParseMode::Explicit));
        let error = parse(&groups(MAX_NESTING + 1)).expect_err("too deep");
        assert!(error.to_string().contains("nested too deeply"), "{error}");

        let item = MapItem::new().with_tag("title", "x");
        assert!(matches(&format!("{}x", "!".repeat(100_000)), &item));
        assert!(!matches(&format!("{}x", "!".repeat(100_001)), &item));
        assert!(matches(&format!("#({}1 = -1)", "-".repeat(100_001)), &item));
        assert!(parse(&format!("#({}1{} = 1)", "(".repeat(10_000), ")".repeat(10_000))).is_err());
        assert!(parse(&format!("#(1{} = 1)", " * 1".repeat(10_000))).is_err());
        assert!(parse(&format!("a = {}x{}", "!&(".repeat(10_000), ")".repeat(10_000))).is_err());
    }

    #[test]
    fn unknown_modifier_is_rejected() {
        assert!(parse("t = /aaa/lsic").is_ok());
        assert!(parse("t = /aaa/icslx").is_err());
        assert!(parse("t = /an/re/").is_err());
    }

    #[test]
    fn numeric_tags_are_not_text() {
        assert!(parse("~#playcount = 3").is_err());
    }

    #[test]
    fn tag_names_allow_spaces_and_abbreviations() {
        let item = MapItem::new().with_tag("tag with spaces", "x").with_tag("title", "Quuxly");
        assert!(matches("tag with spaces = x", &item));
        assert!(matches("T = quux", &item));
    }

    #[test]
    fn arithmetic_precedence() {
        let item = MapItem::new();
        assert!(matches("#(2+3 * 5 = 17)", &item));
        assert!(matches("#((2+3) * 5 = 25)", &item));
        assert!(matches("#(-(6*2) = -12)", &item));
        assert!(matches("#(7 / 2 = 3)", &item));
        assert!(!matches("#(7 / 2 = 3.5)", &item));
        assert!(matches("#(-7 / 2 = -4)", &item));
        assert!(matches("#(7.5 / 2.5 = 3)", &item));
    }

    #[test]
    fn numeric_failures() {
        for text in [
            "#(3*4)",
            "#(t = 3 + )",
            "#(t = -)",
            "#(-4 <)",
            "#(t < ()",
            "#((t +) - 1 > 8)",
            "#(t += 8)",
            "#(t !> 3)",
            "#(t >> 3)",
            "#(t < 3 fortnights)",
        ] {
            assert!(parse(text).is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn durations_and_sizes() {
        let item = MapItem::new()
            .with_number("length", 224.0)
            .with_number("filesize", 6.0 * 1024.0 * 1024.0);
        assert!(matches("#(length = 3:44)", &item));
        assert!(matches("#(length = 0:03:44)", &item));
        assert!(matches("#(length = 3 minutes + 44 seconds)", &item));
        assert!(matches("#(filesize > 5M)", &item));
        assert!(matches("#(filesize < 1 GB)", &item));
    }

    #[test]
    fn date_literals_depend_on_context() {
        let item = MapItem::new()
            .with_tag("date", "2007-05-24")
            .with_number("length", 224.0);
        // 2005 - 7 - 19 = 1979
        assert!(matches("#(length < 2005-07-19)", &item));
        assert!(matches("#(2005-11-24 < 2005-07-19)", &item));
        assert!(matches("#(date > 2005-07-19)", &item));
        assert!(matches("#(date = (2007-05-19) + 5 days)", &item));
        assert!(matches("#(date - 5 days = 2007-05-19)", &item));
        assert!(matches("#(2010 > date)", &item));
        assert!(parse("#(date < 2010 - 4)").is_ok());
        assert!(parse("#(date > 00004)").is_ok());
    }

    #[test]
    fn extension_bodies() {
        let registry = ExtensionRegistry::new();
        registry.register("body", |_item: &dyn ItemAccessor, body: Option<&str>| {
            body == Some("with (nested) parens \\ and )")
        });
        let star = star();
        let compile_with = |text: &str| compile(text, &star, QueryConfig::global(), &registry);

        let (node, _) = compile_with(r"@(body: with (nested) parens \\ and \))").expect("parse");
        assert!(node.search(&MapItem::new()));

        assert!(compile_with("@(body: mismatched ( paren)").is_err());
        assert!(compile_with("@(body:unclosed").is_err());
        assert!(compile_with("@()").is_err());
        assert!(matches!(
            compile_with("@(missing)"),
            Err(QueryError::UnknownExtension(_))
        ));
    }

    #[test]
    fn free_text_splitting() {
        assert_eq!(split_free_text("ate  man"), vec!["ate", "man"]);
        assert_eq!(
            split_free_text("|(a, 'b c') \"d e\" x"),
            vec!["|(a, 'b c')", "\"d e\"", "x"]
        );
        assert_eq!(split_free_text("Rockin' Out"), vec!["Rockin'", "Out"]);
        assert_eq!(split_free_text("!/a b/ c"), vec!["!/a b/", "c"]);
    }

    #[test]
    fn free_text_tokens() {
        let item = MapItem::new().with_tag("title", "oh&blahhh").with_tag("artist", "!ohno");
        assert!(matches("&blah oh", &item));
        assert!(!matches("&blah nope", &item));
        assert!(matches("!nope oh", &item));
        assert!(matches("|(zzz, blah) oh", &item));
        assert!(parse("/unterminated x").is_err());
    }
}
