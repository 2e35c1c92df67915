//! Value normalization: raw scalars to typed [`CellValue`]s.
//!
//! Normalization never fails at the call level. Anything that cannot be
//! coerced into the target type becomes [`CellValue::Error`] so the merge can
//! count it and move on.

use std::{str::FromStr, sync::OnceLock};

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::{
    cell::{CellValue, Numeric, RawCell},
    schema::ColumnType,
};

pub const UNPARSEABLE_NUMBER: &str = "unparseable number";
pub const UNPARSEABLE_DATE: &str = "unparseable date";
pub const NUMBER_OUT_OF_RANGE: &str = "number out of range";

/// Largest serial accepted as a spreadsheet date (9999-12-31).
const MAX_SERIAL_DAY: i64 = 2_958_465;

const CURRENCY_SYMBOLS: &[char] = &['₩', '$', '€', '£', '¥', '￦'];
const CURRENCY_CODES: &[&str] = &["USD", "KRW", "EUR", "GBP", "JPY"];
const NEGATIVE_MARKERS: &[char] = &['-', '−', '△', '▲'];

/// Korean magnitude suffixes, longest first so `천만원` wins over `만원`.
const KOREAN_UNITS: &[(&str, i64)] = &[
    ("천만원", 10_000_000),
    ("백만원", 1_000_000),
    ("십만원", 100_000),
    ("천만", 10_000_000),
    ("백만", 1_000_000),
    ("십만", 100_000),
    ("조원", 1_000_000_000_000),
    ("억원", 100_000_000),
    ("만원", 10_000),
    ("천원", 1_000),
    ("조", 1_000_000_000_000),
    ("억", 100_000_000),
    ("만", 10_000),
    ("천", 1_000),
    ("원", 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Read `a/b/yyyy` as day/month instead of month/day.
    pub day_first: bool,
    /// Year assumed for `M월 D일` values. The pattern is disabled when unset.
    pub default_year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePattern {
    IsoLike,
    IsoLikeWithTime,
    MonthDayYear,
    Compact,
    KoreanFull,
    KoreanMonthDay,
    EnglishMonthFirst,
    EnglishDayFirst,
    ShortYear,
    Serial,
}

fn date_patterns() -> &'static [(DatePattern, Regex)] {
    static PATTERNS: OnceLock<Vec<(DatePattern, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (DatePattern::IsoLike, r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\.?$"),
            (
                DatePattern::IsoLikeWithTime,
                r"^(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})[ T]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?$",
            ),
            (DatePattern::MonthDayYear, r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})$"),
            (DatePattern::Compact, r"^(\d{4})(\d{2})(\d{2})$"),
            (
                DatePattern::KoreanFull,
                r"^(\d{4})\s*년\s*(\d{1,2})\s*월\s*(\d{1,2})\s*일?$",
            ),
            (DatePattern::KoreanMonthDay, r"^(\d{1,2})\s*월\s*(\d{1,2})\s*일?$"),
            (
                DatePattern::EnglishMonthFirst,
                r"^([A-Za-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s*(\d{4})$",
            ),
            (
                DatePattern::EnglishDayFirst,
                r"^(\d{1,2})[\s-]+([A-Za-z]+)\.?[\s-]+(\d{4})$",
            ),
            (DatePattern::ShortYear, r"^(\d{2})[-/.](\d{1,2})[-/.](\d{1,2})$"),
            (DatePattern::Serial, r"^\d{1,7}(?:\.\d+)?$"),
        ]
        .into_iter()
        .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("valid date pattern")))
        .collect()
    })
}

/// Stateless apart from its configuration; cheap to copy into worker tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, raw: &RawCell, target: ColumnType) -> CellValue {
        if raw.is_empty() {
            return CellValue::Empty;
        }
        match target {
            ColumnType::String => normalize_string(raw),
            ColumnType::Number => self.normalize_number(raw),
            ColumnType::Date => self.normalize_date(raw),
        }
    }

    fn normalize_number(&self, raw: &RawCell) -> CellValue {
        let parsed = match raw {
            RawCell::Number(value) => match Decimal::from_f64(*value) {
                Some(decimal) => Some(Numeric::plain(decimal)),
                None if value.is_finite() => {
                    return CellValue::Error(NUMBER_OUT_OF_RANGE.to_string());
                }
                None => None,
            },
            RawCell::Text(text) => parse_number(text),
            _ => None,
        };
        parsed.map_or_else(
            || CellValue::Error(UNPARSEABLE_NUMBER.to_string()),
            CellValue::Number,
        )
    }

    fn normalize_date(&self, raw: &RawCell) -> CellValue {
        let parsed = match raw {
            RawCell::Date(date) => Some(*date),
            RawCell::DateTime(dt) => Some(dt.date()),
            RawCell::Number(serial) => date_from_serial(*serial),
            RawCell::Text(text) => self.parse_date(text),
            _ => None,
        };
        parsed.map_or_else(
            || CellValue::Error(UNPARSEABLE_DATE.to_string()),
            CellValue::Date,
        )
    }

    /// Tries each known date pattern in order; the first full match that
    /// forms a valid calendar date wins.
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        for (kind, regex) in date_patterns() {
            let Some(captures) = regex.captures(value) else {
                continue;
            };
            let field = |idx: usize| captures.get(idx).map(|m| m.as_str()).unwrap_or_default();
            let number = |idx: usize| field(idx).parse::<u32>().ok();
            let parsed = match kind {
                DatePattern::IsoLike | DatePattern::IsoLikeWithTime | DatePattern::Compact => {
                    ymd(number(1), number(2), number(3))
                }
                DatePattern::MonthDayYear => {
                    let (first, second, year) = (number(1), number(2), number(3));
                    match (first, second) {
                        (Some(a), Some(b)) if self.config.day_first || a > 12 => {
                            ymd(year, Some(b), Some(a))
                        }
                        _ => ymd(year, first, second),
                    }
                }
                DatePattern::KoreanFull => ymd(number(1), number(2), number(3)),
                DatePattern::KoreanMonthDay => self.config.default_year.and_then(|year| {
                    NaiveDate::from_ymd_opt(year, number(1)?, number(2)?)
                }),
                DatePattern::EnglishMonthFirst => {
                    ymd(number(3), month_from_name(field(1)), number(2))
                }
                DatePattern::EnglishDayFirst => {
                    ymd(number(3), month_from_name(field(2)), number(1))
                }
                DatePattern::ShortYear => ymd(number(1).map(|y| y + 2000), number(2), number(3)),
                DatePattern::Serial => value.parse::<f64>().ok().and_then(date_from_serial),
            };
            if parsed.is_some() {
                return parsed;
            }
        }
        None
    }
}

fn ymd(year: Option<u32>, month: Option<u32>, day: Option<u32>) -> Option<NaiveDate> {
    let year = i32::try_from(year?).ok()?;
    NaiveDate::from_ymd_opt(year, month?, day?)
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let lowered = name.to_ascii_lowercase();
    if lowered == "sept" {
        return Some(9);
    }
    MONTHS
        .iter()
        .position(|full| *full == lowered || (lowered.len() == 3 && full.starts_with(&lowered)))
        .map(|idx| idx as u32 + 1)
}

/// Converts a 1900-system spreadsheet serial day number into a date.
pub fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let days = serial.floor() as i64;
    if !(1..=MAX_SERIAL_DAY).contains(&days) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(days))
}

/// Serial day number of a date in the 1900 system (inverse of [`date_from_serial`]).
pub fn serial_from_date(date: NaiveDate) -> Option<i64> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let days = date.num_days_from_ce() as i64 - epoch.num_days_from_ce() as i64;
    (1..=MAX_SERIAL_DAY).contains(&days).then_some(days)
}

fn normalize_string(raw: &RawCell) -> CellValue {
    let text = raw.as_display();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        CellValue::Empty
    } else {
        CellValue::String(trimmed.to_string())
    }
}

fn to_halfwidth(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '０'..='９' => char::from_u32(ch as u32 - '０' as u32 + '0' as u32).unwrap_or(ch),
            '．' => '.',
            '，' => ',',
            '－' => '-',
            '％' => '%',
            other => other,
        })
        .collect()
}

fn strip_currency(value: &str) -> &str {
    let mut body = value.trim().trim_matches(CURRENCY_SYMBOLS).trim();
    for code in CURRENCY_CODES {
        if body.len() >= code.len() {
            if body.is_char_boundary(code.len()) && body[..code.len()].eq_ignore_ascii_case(code) {
                body = body[code.len()..].trim_start();
            } else if body.is_char_boundary(body.len() - code.len())
                && body[body.len() - code.len()..].eq_ignore_ascii_case(code)
            {
                body = body[..body.len() - code.len()].trim_end();
            }
        }
    }
    body.trim_matches(CURRENCY_SYMBOLS).trim()
}

/// Parses a human-formatted number such as `"1,200,000원"`, `"(3.5%)"` or
/// `"$ 12.00"`. Returns `None` for anything with residue left after
/// stripping separators, symbols and units.
pub fn parse_number(raw: &str) -> Option<Numeric> {
    let halfwidth = to_halfwidth(raw.trim());
    let mut body = halfwidth.as_str();
    if body.is_empty() {
        return None;
    }

    let mut negative = false;
    if body.len() > 2 && body.starts_with('(') && body.ends_with(')') {
        negative = true;
        body = body[1..body.len() - 1].trim();
    }
    if let Some(rest) = body.strip_prefix(NEGATIVE_MARKERS) {
        negative = !negative;
        body = rest.trim_start();
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest.trim_start();
    }

    let mut percent = false;
    if let Some(rest) = body.strip_suffix('%') {
        percent = true;
        body = rest.trim_end();
    }

    body = strip_currency(body);
    if !negative && let Some(rest) = body.strip_prefix(NEGATIVE_MARKERS) {
        negative = true;
        body = rest.trim_start();
    }

    let mut multiplier = Decimal::ONE;
    if let Some((unit, factor)) = KOREAN_UNITS.iter().find(|(unit, _)| body.ends_with(unit)) {
        multiplier = Decimal::from(*factor);
        body = body[..body.len() - unit.len()].trim_end();
    }

    let digits: String = body
        .chars()
        .filter(|ch| !matches!(ch, ',' | ' ' | '_' | '\u{a0}' | '\''))
        .collect();
    let value = parse_plain_decimal(&digits)?;

    let mut value = value.checked_mul(multiplier)?;
    if negative {
        value = -value;
    }
    if percent {
        value = value.checked_div(Decimal::ONE_HUNDRED)?;
        return Some(Numeric::percent(value));
    }
    Some(Numeric::plain(value))
}

fn parse_plain_decimal(digits: &str) -> Option<Decimal> {
    if digits.is_empty() {
        return None;
    }
    let (mantissa, exponent) = match digits.find(['e', 'E']) {
        Some(pos) => (&digits[..pos], Some(&digits[pos + 1..])),
        None => (digits, None),
    };
    let mut dots = 0usize;
    let mut saw_digit = false;
    for ch in mantissa.chars() {
        match ch {
            '0'..='9' => saw_digit = true,
            '.' => dots += 1,
            _ => return None,
        }
    }
    if !saw_digit || dots > 1 {
        return None;
    }
    match exponent {
        None => Decimal::from_str(mantissa).ok(),
        Some(exp) => {
            let exp_digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            if exp_digits.is_empty() || !exp_digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Decimal::from_scientific(digits).ok()
        }
    }
}

/// True when the text would normalize to a number or a date.
pub fn looks_like_data(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    parse_number(trimmed).is_some() || Normalizer::default().parse_date(trimmed).is_some()
}
