//! Numeric expressions inside `#(...)` comparisons.
//!
//! Durations normalise to seconds, sizes to bytes and dates to epoch
//! seconds at local midnight. Evaluation never fails: a division by zero
//! poisons the expression and the enclosing comparison is false.

use std::fmt;

use chrono::{Local, NaiveDate, TimeZone};

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::item::ItemAccessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Seconds,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Operators in the order they must be tried when scanning input.
    pub const SYMBOLS: [(&'static str, CompareOp); 7] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        ("=", CompareOp::Eq),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
            Self::Ne => "!=",
        }
    }

    fn apply(self, left: f64, right: f64, epsilon: f64) -> bool {
        let equal = (left - right).abs() < epsilon;
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right || equal,
            Self::Gt => left > right,
            Self::Ge => left >= right || equal,
            Self::Eq => equal,
            Self::Ne => !equal,
        }
    }
}

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum NumExpr {
    Number {
        value: f64,
        unit: Option<Unit>,
    },
    /// `2005-07-19`: the number 1979 or that day, depending on context.
    NumberOrDate {
        number: f64,
        date: f64,
    },
    Tag(NumericTag),
    Now,
    Today,
    Negate(Box<NumExpr>),
    Binary {
        op: BinaryOp,
        left: Box<NumExpr>,
        right: Box<NumExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagFamily {
    Date,
    Time,
    Duration,
    Size,
    Plain,
}

/// A tag referenced by name inside a numeric expression.
#[derive(Debug, Clone)]
pub struct NumericTag {
    name: String,
    key: String,
    family: TagFamily,
    round_digits: u32,
}

impl NumericTag {
    pub fn new(name: &str, config: &QueryConfig) -> Self {
        let name = name.trim().trim_start_matches("~#").trim_start_matches('~').to_lowercase();
        let key = format!("~#{name}");
        let base = key.split(':').next().unwrap_or(&key);
        let family = if name == "date" {
            TagFamily::Date
        } else if config.is_time_tag(base) {
            TagFamily::Time
        } else if config.is_duration_tag(base) {
            TagFamily::Duration
        } else if config.is_size_tag(base) {
            TagFamily::Size
        } else {
            TagFamily::Plain
        };
        Self {
            name,
            key,
            family,
            round_digits: config.round_digits,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn accepts_unit(&self, unit: Unit) -> bool {
        match unit {
            Unit::Seconds => matches!(self.family, TagFamily::Time | TagFamily::Duration),
            Unit::Bytes => self.family == TagFamily::Size,
        }
    }

    fn evaluate(&self, item: &dyn ItemAccessor, context: &EvalContext) -> f64 {
        let value = match self.family {
            TagFamily::Date => item
                .get("date")
                .and_then(|value| parse_date_value(&value))
                .unwrap_or(0.0),
            TagFamily::Time => {
                let timestamp = item.numeric(&self.key).unwrap_or(0.0);
                if context.use_date {
                    timestamp
                } else {
                    context.now - timestamp
                }
            }
            _ => item.numeric(&self.key).unwrap_or(0.0),
        };
        round_to(value, self.round_digits)
    }
}

/// Clock readings and interpretation mode for one comparison.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    now: f64,
    today: f64,
    use_date: bool,
}

impl EvalContext {
    pub fn capture(use_date: bool) -> Self {
        let now = Local::now();
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .map(|midnight| midnight.timestamp() as f64)
            .unwrap_or(now.timestamp() as f64);
        Self {
            now: now.timestamp() as f64,
            today,
            use_date,
        }
    }

    #[cfg(test)]
    pub(crate) fn fixed(now: f64, today: f64, use_date: bool) -> Self {
        Self {
            now,
            today,
            use_date,
        }
    }
}

impl NumExpr {
    /// Returns `None` when the expression divides by zero. `/` is floor
    /// division.
    pub fn evaluate(&self, item: &dyn ItemAccessor, context: &EvalContext) -> Option<f64> {
        match self {
            Self::Number { value, .. } => Some(*value),
            Self::NumberOrDate { number, date } => {
                Some(if context.use_date { *date } else { *number })
            }
            Self::Tag(tag) => Some(tag.evaluate(item, context)),
            Self::Now => Some(context.now),
            Self::Today => Some(context.today),
            Self::Negate(inner) => inner.evaluate(item, context).map(|value| -value),
            Self::Binary { op, left, right } => {
                let left = left.evaluate(item, context)?;
                let right = right.evaluate(item, context)?;
                match op {
                    BinaryOp::Add => Some(left + right),
                    BinaryOp::Sub => Some(left - right),
                    BinaryOp::Mul => Some(left * right),
                    BinaryOp::Div if right == 0.0 => None,
                    BinaryOp::Div => Some((left / right).floor()),
                }
            }
        }
    }

    /// Whether the comparison must read ambiguous literals as dates.
    pub fn uses_date(&self) -> bool {
        match self {
            Self::Tag(tag) => tag.family == TagFamily::Date,
            Self::Now | Self::Today => true,
            Self::Negate(inner) => inner.uses_date(),
            Self::Binary { left, right, .. } => left.uses_date() || right.uses_date(),
            Self::Number { .. } | Self::NumberOrDate { .. } => false,
        }
    }

    /// Unit of a bare literal such as `3 minutes` or `5M`.
    pub fn unit(&self) -> Option<Unit> {
        match self {
            Self::Number { unit, .. } => *unit,
            _ => None,
        }
    }

    fn accepts_unit(&self, unit: Unit) -> bool {
        match self {
            Self::Tag(tag) => tag.accepts_unit(unit),
            _ => true,
        }
    }
}

impl fmt::Display for NumExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number { value, .. } => write!(f, "{value}"),
            Self::NumberOrDate { number, .. } => write!(f, "{number}"),
            Self::Tag(tag) => write!(f, "{}", tag.name),
            Self::Now => write!(f, "now"),
            Self::Today => write!(f, "today"),
            Self::Negate(inner) => write!(f, "-({inner})"),
            Self::Binary { op, left, right } => {
                let symbol = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                };
                write!(f, "({left} {symbol} {right})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Comparison node
// ---------------------------------------------------------------------------

/// A chained comparison `a op b [op c ...]`; each operand is evaluated
/// once per search and every adjacent pair must hold.
#[derive(Debug, Clone)]
pub struct NumericComparison {
    operands: Vec<NumExpr>,
    ops: Vec<CompareOp>,
    use_date: bool,
    epsilon: f64,
}

impl NumericComparison {
    pub fn new(operands: Vec<NumExpr>, ops: Vec<CompareOp>, epsilon: f64) -> Result<Self> {
        if ops.is_empty() || operands.len() != ops.len() + 1 {
            return Err(QueryError::Parse(
                "numeric comparison needs a relational operator between operands".to_string(),
            ));
        }
        for pair in operands.windows(2) {
            check_units(&pair[0], &pair[1])?;
            check_units(&pair[1], &pair[0])?;
        }
        let use_date = operands.iter().any(NumExpr::uses_date);
        Ok(Self {
            operands,
            ops,
            use_date,
            epsilon,
        })
    }

    pub fn search(&self, item: &dyn ItemAccessor) -> bool {
        self.search_with(item, &EvalContext::capture(self.use_date))
    }

    fn search_with(&self, item: &dyn ItemAccessor, context: &EvalContext) -> bool {
        let mut values = Vec::with_capacity(self.operands.len());
        for operand in &self.operands {
            match operand.evaluate(item, context) {
                Some(value) => values.push(value),
                None => return false,
            }
        }
        self.ops
            .iter()
            .zip(values.windows(2))
            .all(|(op, pair)| op.apply(pair[0], pair[1], self.epsilon))
    }
}

impl fmt::Display for NumericComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#(")?;
        for (index, operand) in self.operands.iter().enumerate() {
            if index > 0 {
                write!(f, " {} ", self.ops[index - 1].symbol())?;
            }
            write!(f, "{operand}")?;
        }
        write!(f, ")")
    }
}

fn check_units(tag: &NumExpr, literal: &NumExpr) -> Result<()> {
    match literal.unit() {
        Some(unit) if !tag.accepts_unit(unit) => Err(QueryError::Parse(format!(
            "wrong units for {tag}: cannot compare with {literal} {}",
            match unit {
                Unit::Seconds => "seconds",
                Unit::Bytes => "bytes",
            }
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Literals
// ---------------------------------------------------------------------------

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;

const TIME_UNITS: [(&str, &[&str], f64); 7] = [
    ("second", &["s", "sec", "secs"], 1.0),
    ("minute", &["min", "mins"], MINUTE),
    ("hour", &["h", "hr", "hrs"], HOUR),
    ("day", &["d"], DAY),
    ("week", &["w", "wk", "wks"], 7.0 * DAY),
    ("month", &["mo", "mon", "mons"], 30.0 * DAY),
    ("year", &["y", "yr", "yrs"], 365.0 * DAY),
];

/// Resolves a unit word following a number, returning the multiplier and
/// the scale it converts to.
///
/// Time words match by prefix (`minutes`, `minute`) or short form (`min`);
/// anything else is a size named by its first letter (`k`, `MB`, `gigs`).
pub fn unit_multiplier(word: &str) -> Option<(f64, Unit)> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return None;
    }
    for (long, short, multiplier) in TIME_UNITS {
        if word.starts_with(long) || short.contains(&word.as_str()) {
            return Some((multiplier, Unit::Seconds));
        }
    }
    let power = match word.chars().next()? {
        'b' => 0,
        'k' => 1,
        'm' => 2,
        'g' => 3,
        't' => 4,
        _ => return None,
    };
    Some((1024_f64.powi(power), Unit::Bytes))
}

/// Local midnight of `YYYY[-MM[-DD]]` as epoch seconds.
pub fn parse_date_literal(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = match parts.next() {
        Some(month) => month.parse().ok()?,
        None => 1,
    };
    let day: u32 = match parts.next() {
        Some(day) => day.parse().ok()?,
        None => 1,
    };
    let midnight = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|datetime| datetime.timestamp() as f64)
}

/// Like [`parse_date_literal`], ignoring a time part (`2007-05-24 12:00`).
fn parse_date_value(raw: &str) -> Option<f64> {
    let date = raw.trim().split(['T', ' ']).next()?;
    parse_date_literal(date)
}

fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10_f64.powi(digits as i32);
    (value * scale).round() / scale
}
