use chrono::{DateTime, Duration, Months, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?(?P<number>[0-9]+)(?P<interval>[hdwmy])$")
        .expect("relative date pattern is valid")
});

// Anything larger overflows or is meaningless as a lookback window.
const MAX_RELATIVE_UNITS: u32 = 10_000;

/// Parses `-1d`, `2w`, `-6m` and friends into a point in the past.
///
/// The sign is optional: relative dates always look backwards from now.
pub fn parse_relative_date(raw: &str) -> Option<DateTime<Utc>> {
    parse_relative_date_from(raw, Utc::now())
}

pub fn parse_relative_date_from(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let captures = RELATIVE_DATE_REGEX.captures(raw.trim())?;
    let number: u32 = captures.name("number")?.as_str().parse().ok()?;
    if number >= MAX_RELATIVE_UNITS {
        return None;
    }

    match captures.name("interval")?.as_str() {
        "h" => now.checked_sub_signed(Duration::hours(i64::from(number))),
        "d" => now.checked_sub_signed(Duration::days(i64::from(number))),
        "w" => now.checked_sub_signed(Duration::weeks(i64::from(number))),
        "m" => now.checked_sub_months(Months::new(number)),
        "y" => now.checked_sub_months(Months::new(number.checked_mul(12)?)),
        _ => None,
    }
}
