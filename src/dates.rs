//! Natural-language date-range extraction.
//!
//! Runs over the raw query string before embedding: the first recognized
//! phrase yields an inclusive `(from, to)` date range and is stripped from
//! the query. The parser is a straight-line cascade of pattern attempts —
//! explicit alternatives tried in priority order, not one large regex.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Query with the recognized date phrase removed and whitespace collapsed.
    pub clean_query: String,
    pub range: Option<DateRange>,
}

/// Earliest date produced for open-ended "before X" style bounds.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch")
}

const MONTHS_PATTERN: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|\
     jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

const WEEKDAYS_PATTERN: &str =
    "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

struct Patterns {
    range: Regex,
    counted: Regex,
    modifier: Regex,
    prefixed: Regex,
    relative_bare: Regex,
    simple_bare: Regex,
    // Anchored sub-parsers for one simple date expression.
    iso: Regex,
    slash: Regex,
    year: Regex,
    month_first: Regex,
    day_first: Regex,
    relative: Regex,
}

fn simple_pattern() -> String {
    // Order matters inside the alternation: longer forms first.
    // The \b after the day keeps a bare "march 2021" from being read as
    // month + day "20" with the year's tail left dangling.
    format!(
        r"\d{{4}}-\d{{1,2}}-\d{{1,2}}|\d{{1,2}}/\d{{1,2}}/\d{{4}}|\d{{1,2}}\s+(?:{m})(?:\s+\d{{4}})?|(?:{m})(?:\s+\d{{1,2}}\b)?(?:,?\s+\d{{4}})?|(?:19|20)\d{{2}}",
        m = MONTHS_PATTERN
    )
}

fn relative_pattern() -> String {
    format!(
        r"today|yesterday|tomorrow|(?:last|this|next)\s+(?:financial\s+year|week|month|year|quarter|{w})",
        w = WEEKDAYS_PATTERN
    )
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let simple = simple_pattern();
        let relative = relative_pattern();
        let span = format!("{relative}|{simple}");
        Patterns {
            range: Regex::new(&format!(
                r"(?i)\b(?:between|from)\s+({simple})\s+(?:and|to)\s+({simple})\b"
            ))
            .expect("range pattern"),
            counted: Regex::new(
                r"(?i)\b(last|past|previous|next)\s+(\d{1,3})\s+(day|week|month|year)s?\b",
            )
            .expect("counted pattern"),
            modifier: Regex::new(&format!(
                r"(?i)\b(early|mid|late|beginning\s+of|start\s+of|end\s+of)\s+({span})\b"
            ))
            .expect("modifier pattern"),
            prefixed: Regex::new(&format!(
                r"(?i)\b(after|since|before|until|till|up\s+to|in|on|during|from)\s+({span})\b"
            ))
            .expect("prefixed pattern"),
            relative_bare: Regex::new(&format!(r"(?i)\b(?:{relative})\b"))
                .expect("relative pattern"),
            simple_bare: Regex::new(&format!(r"(?i)\b(?:{simple})\b")).expect("simple pattern"),
            iso: Regex::new(r"(?i)^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("iso"),
            slash: Regex::new(r"(?i)^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("slash"),
            year: Regex::new(r"(?i)^((?:19|20)\d{2})$").expect("year"),
            month_first: Regex::new(&format!(
                r"(?i)^({m})(?:\s+(\d{{1,2}})\b)?(?:,?\s+(\d{{4}}))?$",
                m = MONTHS_PATTERN
            ))
            .expect("month-first"),
            day_first: Regex::new(&format!(
                r"(?i)^(\d{{1,2}})\s+({m})(?:\s+(\d{{4}}))?$",
                m = MONTHS_PATTERN
            ))
            .expect("day-first"),
            relative: Regex::new(&format!(r"(?i)^(?:{relative})$")).expect("relative anchored"),
        }
    })
}

/// Extract a date range from `query`, using the local calendar date as "today".
pub fn parse_query(query: &str) -> ParsedQuery {
    parse_query_at(query, chrono::Local::now().date_naive())
}

/// Deterministic entry point for tests.
pub fn parse_query_at(query: &str, today: NaiveDate) -> ParsedQuery {
    let p = patterns();

    // 1. Explicit ranges: "between A and B", "from A to B".
    if let Some(caps) = p.range.captures(query) {
        let a = parse_simple(caps.get(1).map(|m| m.as_str()).unwrap_or(""), today);
        let b = parse_simple(caps.get(2).map(|m| m.as_str()).unwrap_or(""), today);
        if let (Some(a), Some(b)) = (a, b) {
            let whole = caps.get(0).expect("match");
            let range =
                DateRange { from: a.from.min(b.from), to: b.to.max(a.to) };
            return stripped(query, whole.start(), whole.end(), Some(range));
        }
    }

    // 2. Counted spans: "last 7 days", "next 2 weeks".
    if let Some(caps) = p.counted.captures(query) {
        let direction = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let count: i64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let unit = caps.get(3).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        if count > 0 {
            let range = counted_span(today, &direction, count, &unit);
            let whole = caps.get(0).expect("match");
            return stripped(query, whole.start(), whole.end(), Some(range));
        }
    }

    // 3. Third-slicing modifiers: "early 2024", "end of last month".
    if let Some(caps) = p.modifier.captures(query) {
        let modifier = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let target = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if let Some(span) = parse_span(target, today) {
            let whole = caps.get(0).expect("match");
            return stripped(query, whole.start(), whole.end(), Some(slice_third(span, &modifier)));
        }
    }

    // 4. Bounded prefixes: "after X", "before X", "in X", "from X".
    if let Some(caps) = p.prefixed.captures(query) {
        let prefix = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let target = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if let Some(span) = parse_span(target, today) {
            let range = match prefix.as_str() {
                "after" | "since" => DateRange { from: span.from, to: today },
                "before" => DateRange {
                    from: epoch(),
                    to: span.from.pred_opt().unwrap_or(span.from),
                },
                "until" | "till" | "up to" => DateRange { from: epoch(), to: span.to },
                // "in", "on", "during", bare "from": the span itself.
                _ => span,
            };
            let whole = caps.get(0).expect("match");
            return stripped(query, whole.start(), whole.end(), Some(range));
        }
    }

    // 5. Bare relative spans: "today", "last month".
    if let Some(m) = p.relative_bare.find(query) {
        if let Some(range) = parse_relative(m.as_str(), today) {
            return stripped(query, m.start(), m.end(), Some(range));
        }
    }

    // 6. Bare literal dates: "2024-03-01", "march 2021", "2023".
    if let Some(m) = p.simple_bare.find(query) {
        if let Some(range) = parse_simple(m.as_str(), today) {
            return stripped(query, m.start(), m.end(), Some(range));
        }
    }

    ParsedQuery { clean_query: collapse(query), range: None }
}

fn stripped(query: &str, start: usize, end: usize, range: Option<DateRange>) -> ParsedQuery {
    let mut remainder = String::with_capacity(query.len());
    remainder.push_str(&query[..start]);
    remainder.push(' ');
    remainder.push_str(&query[end..]);
    ParsedQuery { clean_query: collapse(&remainder), range }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Simple date expressions
// ---------------------------------------------------------------------------

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = shift_month(year, month, 1);
    let first_next = NaiveDate::from_ymd_opt(next_y, next_m, 1).expect("month start");
    first_next.pred_opt().expect("month end").day()
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let total = year * 12 + (month as i32 - 1) + delta;
    (total.div_euclid(12), (total.rem_euclid(12) + 1) as u32)
}

fn month_span(year: i32, month: u32) -> Option<DateRange> {
    let from = NaiveDate::from_ymd_opt(year, month, 1)?;
    let to = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
    Some(DateRange { from, to })
}

fn year_span(year: i32) -> Option<DateRange> {
    Some(DateRange {
        from: NaiveDate::from_ymd_opt(year, 1, 1)?,
        to: NaiveDate::from_ymd_opt(year, 12, 31)?,
    })
}

fn single_day(date: NaiveDate) -> DateRange {
    DateRange { from: date, to: date }
}

/// Parse one literal date expression (no relative forms).
fn parse_simple(text: &str, today: NaiveDate) -> Option<DateRange> {
    let p = patterns();
    let text = text.trim();

    if let Some(caps) = p.iso.captures(text) {
        let y: i32 = caps[1].parse().ok()?;
        let m: u32 = caps[2].parse().ok()?;
        let d: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d).map(single_day);
    }

    if let Some(caps) = p.slash.captures(text) {
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        // DD/MM when the first field cannot be a month, MM/DD otherwise.
        let (day, month) = if first > 12 { (first, second) } else { (second, first) };
        return NaiveDate::from_ymd_opt(year, month, day).map(single_day);
    }

    if let Some(caps) = p.day_first.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year: i32 = caps.get(3).map_or(Some(today.year()), |m| m.as_str().parse().ok())?;
        return NaiveDate::from_ymd_opt(year, month, day).map(single_day);
    }

    if let Some(caps) = p.month_first.captures(text) {
        let month = month_number(&caps[1])?;
        let day: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let year: i32 = caps.get(3).map_or(Some(today.year()), |m| m.as_str().parse().ok())?;
        return match day {
            Some(d) => NaiveDate::from_ymd_opt(year, month, d).map(single_day),
            None => month_span(year, month),
        };
    }

    if let Some(caps) = p.year.captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        return year_span(year);
    }

    None
}

/// Literal or relative date expression.
fn parse_span(text: &str, today: NaiveDate) -> Option<DateRange> {
    let p = patterns();
    let text = text.trim();
    if p.relative.is_match(text) {
        return parse_relative(text, today);
    }
    parse_simple(text, today)
}

// ---------------------------------------------------------------------------
// Relative spans
// ---------------------------------------------------------------------------

fn week_of(date: NaiveDate) -> DateRange {
    let week = date.week(Weekday::Mon);
    DateRange { from: week.first_day(), to: week.last_day() }
}

fn quarter_of(date: NaiveDate) -> DateRange {
    let q0 = (date.month0() / 3) * 3 + 1;
    DateRange {
        from: NaiveDate::from_ymd_opt(date.year(), q0, 1).expect("quarter start"),
        to: month_span(date.year(), q0 + 2).expect("quarter end").to,
    }
}

/// April 1 .. March 31 financial year containing `date`.
fn financial_year_of(date: NaiveDate) -> DateRange {
    let start_year = if date.month() >= 4 { date.year() } else { date.year() - 1 };
    DateRange {
        from: NaiveDate::from_ymd_opt(start_year, 4, 1).expect("fy start"),
        to: NaiveDate::from_ymd_opt(start_year + 1, 3, 31).expect("fy end"),
    }
}

fn parse_relative(text: &str, today: NaiveDate) -> Option<DateRange> {
    let lowered = collapse(&text.to_lowercase());
    match lowered.as_str() {
        "today" => return Some(single_day(today)),
        "yesterday" => return Some(single_day(today.pred_opt()?)),
        "tomorrow" => return Some(single_day(today.succ_opt()?)),
        _ => {}
    }

    let (direction, unit) = lowered.split_once(' ')?;
    let offset: i32 = match direction {
        "last" => -1,
        "this" => 0,
        "next" => 1,
        _ => return None,
    };

    match unit {
        "week" => {
            let anchor = today + Duration::weeks(offset as i64);
            Some(week_of(anchor))
        }
        "month" => {
            let (y, m) = shift_month(today.year(), today.month(), offset);
            month_span(y, m)
        }
        "year" => year_span(today.year() + offset),
        "quarter" => {
            let (y, m) = shift_month(today.year(), today.month(), offset * 3);
            let anchor = NaiveDate::from_ymd_opt(y, m, 1)?;
            Some(quarter_of(anchor))
        }
        "financial year" => {
            let this = financial_year_of(today);
            let anchor_year = this.from.year() + offset;
            Some(DateRange {
                from: NaiveDate::from_ymd_opt(anchor_year, 4, 1)?,
                to: NaiveDate::from_ymd_opt(anchor_year + 1, 3, 31)?,
            })
        }
        weekday => {
            let target: Weekday = weekday.parse().ok()?;
            let this_week = week_of(today).from;
            let day = this_week
                + Duration::days(target.num_days_from_monday() as i64)
                + Duration::weeks(offset as i64);
            Some(single_day(day))
        }
    }
}

fn counted_span(today: NaiveDate, direction: &str, count: i64, unit: &str) -> DateRange {
    let backwards = matches!(direction, "last" | "past" | "previous");
    let shifted = match unit {
        "day" => today + Duration::days(if backwards { -count } else { count }),
        "week" => today + Duration::weeks(if backwards { -count } else { count }),
        "month" => {
            let delta = if backwards { -count } else { count } as i32;
            let (y, m) = shift_month(today.year(), today.month(), delta);
            let day = today.day().min(days_in_month(y, m));
            NaiveDate::from_ymd_opt(y, m, day).unwrap_or(today)
        }
        _ => {
            let delta = if backwards { -count } else { count } as i32;
            let y = today.year() + delta;
            let day = today.day().min(days_in_month(y, today.month()));
            NaiveDate::from_ymd_opt(y, today.month(), day).unwrap_or(today)
        }
    };
    if backwards {
        DateRange { from: shifted, to: today }
    } else {
        DateRange { from: today, to: shifted }
    }
}

/// Slice the inner span into thirds: early/beginning/start, mid, late/end.
fn slice_third(span: DateRange, modifier: &str) -> DateRange {
    let total = (span.to - span.from).num_days() + 1;
    let third = (total / 3).max(1);
    let normalized = collapse(modifier);
    match normalized.as_str() {
        "early" | "beginning of" | "start of" => DateRange {
            from: span.from,
            to: (span.from + Duration::days(third - 1)).min(span.to),
        },
        "late" | "end of" => DateRange {
            from: (span.to - Duration::days(third - 1)).max(span.from),
            to: span.to,
        },
        _ => DateRange {
            from: (span.from + Duration::days(third)).min(span.to),
            to: (span.to - Duration::days(third)).max(span.from),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    // Fixed "today" for determinism: Wednesday 2024-07-17.
    fn today() -> NaiveDate {
        d(2024, 7, 17)
    }

    #[test]
    fn test_year_with_from_prefix() {
        let parsed = parse_query_at("photos from 2024", today());
        let range = parsed.range.unwrap();
        assert_eq!(range.from, d(2024, 1, 1));
        assert_eq!(range.to, d(2024, 12, 31));
        assert_eq!(parsed.clean_query, "photos");
    }

    #[test]
    fn test_last_n_days() {
        let parsed = parse_query_at("last 7 days", today());
        let range = parsed.range.unwrap();
        assert_eq!(range.from, today() - Duration::days(7));
        assert_eq!(range.to, today());
        assert_eq!(parsed.clean_query, "");
    }

    #[test]
    fn test_between_range_strips_phrase() {
        let parsed = parse_query_at("between 2023-01-01 and 2023-06-30 beach", today());
        let range = parsed.range.unwrap();
        assert_eq!(range.from, d(2023, 1, 1));
        assert_eq!(range.to, d(2023, 6, 30));
        assert_eq!(parsed.clean_query, "beach");
    }

    #[test]
    fn test_from_to_range() {
        let parsed = parse_query_at("sunset from march 2021 to may 2021", today());
        let range = parsed.range.unwrap();
        assert_eq!(range.from, d(2021, 3, 1));
        assert_eq!(range.to, d(2021, 5, 31));
        assert_eq!(parsed.clean_query, "sunset");
    }

    #[test]
    fn test_slash_disambiguation_prefers_dd_mm_when_first_over_12() {
        let parsed = parse_query_at("on 25/12/2023", today());
        assert_eq!(parsed.range.unwrap(), DateRange { from: d(2023, 12, 25), to: d(2023, 12, 25) });

        let parsed = parse_query_at("on 05/12/2023", today());
        assert_eq!(parsed.range.unwrap(), DateRange { from: d(2023, 5, 12), to: d(2023, 5, 12) });
    }

    #[test]
    fn test_textual_month_forms() {
        let r = parse_query_at("march 2021", today()).range.unwrap();
        assert_eq!(r, DateRange { from: d(2021, 3, 1), to: d(2021, 3, 31) });

        let r = parse_query_at("march 3 2021", today()).range.unwrap();
        assert_eq!(r, DateRange { from: d(2021, 3, 3), to: d(2021, 3, 3) });

        let r = parse_query_at("3 march 2021", today()).range.unwrap();
        assert_eq!(r, DateRange { from: d(2021, 3, 3), to: d(2021, 3, 3) });

        // Month without year resolves to the current year.
        let r = parse_query_at("in january", today()).range.unwrap();
        assert_eq!(r, DateRange { from: d(2024, 1, 1), to: d(2024, 1, 31) });
    }

    #[test]
    fn test_relative_days() {
        assert_eq!(
            parse_query_at("today", today()).range.unwrap(),
            DateRange { from: today(), to: today() }
        );
        assert_eq!(
            parse_query_at("yesterday", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 16), to: d(2024, 7, 16) }
        );
        assert_eq!(
            parse_query_at("tomorrow", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 18), to: d(2024, 7, 18) }
        );
    }

    #[test]
    fn test_relative_week_month_year() {
        // 2024-07-17 is a Wednesday; its ISO week is Jul 15..Jul 21.
        assert_eq!(
            parse_query_at("this week", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 15), to: d(2024, 7, 21) }
        );
        assert_eq!(
            parse_query_at("last week", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 8), to: d(2024, 7, 14) }
        );
        assert_eq!(
            parse_query_at("last month", today()).range.unwrap(),
            DateRange { from: d(2024, 6, 1), to: d(2024, 6, 30) }
        );
        assert_eq!(
            parse_query_at("next year", today()).range.unwrap(),
            DateRange { from: d(2025, 1, 1), to: d(2025, 12, 31) }
        );
    }

    #[test]
    fn test_quarter_and_financial_year() {
        assert_eq!(
            parse_query_at("this quarter", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 1), to: d(2024, 9, 30) }
        );
        assert_eq!(
            parse_query_at("last quarter", today()).range.unwrap(),
            DateRange { from: d(2024, 4, 1), to: d(2024, 6, 30) }
        );
        // FY runs April 1 .. March 31.
        assert_eq!(
            parse_query_at("this financial year", today()).range.unwrap(),
            DateRange { from: d(2024, 4, 1), to: d(2025, 3, 31) }
        );
        assert_eq!(
            parse_query_at("last financial year", today()).range.unwrap(),
            DateRange { from: d(2023, 4, 1), to: d(2024, 3, 31) }
        );
    }

    #[test]
    fn test_weekdays() {
        assert_eq!(
            parse_query_at("last friday", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 12), to: d(2024, 7, 12) }
        );
        assert_eq!(
            parse_query_at("this friday", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 19), to: d(2024, 7, 19) }
        );
        assert_eq!(
            parse_query_at("next monday", today()).range.unwrap(),
            DateRange { from: d(2024, 7, 22), to: d(2024, 7, 22) }
        );
    }

    #[test]
    fn test_bounded_prefixes() {
        assert_eq!(
            parse_query_at("since 2023", today()).range.unwrap(),
            DateRange { from: d(2023, 1, 1), to: today() }
        );
        assert_eq!(
            parse_query_at("after march 2024", today()).range.unwrap(),
            DateRange { from: d(2024, 3, 1), to: today() }
        );
        assert_eq!(
            parse_query_at("before 2024", today()).range.unwrap(),
            DateRange { from: epoch(), to: d(2023, 12, 31) }
        );
        assert_eq!(
            parse_query_at("until march 2024", today()).range.unwrap(),
            DateRange { from: epoch(), to: d(2024, 3, 31) }
        );
        assert_eq!(
            parse_query_at("during last month", today()).range.unwrap(),
            DateRange { from: d(2024, 6, 1), to: d(2024, 6, 30) }
        );
    }

    #[test]
    fn test_third_slicing() {
        // June has 30 days: thirds of 10.
        assert_eq!(
            parse_query_at("early last month", today()).range.unwrap(),
            DateRange { from: d(2024, 6, 1), to: d(2024, 6, 10) }
        );
        assert_eq!(
            parse_query_at("mid last month", today()).range.unwrap(),
            DateRange { from: d(2024, 6, 11), to: d(2024, 6, 20) }
        );
        assert_eq!(
            parse_query_at("end of last month", today()).range.unwrap(),
            DateRange { from: d(2024, 6, 21), to: d(2024, 6, 30) }
        );
        assert_eq!(
            parse_query_at("beginning of 2024", today()).range.unwrap(),
            DateRange { from: d(2024, 1, 1), to: d(2024, 5, 1) }
        );
    }

    #[test]
    fn test_no_date_leaves_query_untouched() {
        let parsed = parse_query_at("sunset over  mountains", today());
        assert!(parsed.range.is_none());
        assert_eq!(parsed.clean_query, "sunset over mountains");
    }

    #[test]
    fn test_plain_numbers_are_not_years() {
        assert!(parse_query_at("route 66", today()).range.is_none());
        assert!(parse_query_at("photo 123", today()).range.is_none());
    }

    #[test]
    fn test_phrase_stripped_mid_query() {
        let parsed = parse_query_at("beach sunset last 30 days in hawaii", today());
        assert!(parsed.range.is_some());
        assert_eq!(parsed.clean_query, "beach sunset in hawaii");
    }
}
