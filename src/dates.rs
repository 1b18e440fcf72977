use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static SLASH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[/.-](\d{1,2})[/.-](\d{4})$").expect("valid slash date regex")
});

static PT_LONG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:\p{L}+(?:-\p{L}+)?,\s*)?(\d{1,2})\s+de\s+(\p{L}+)\s+de\s+(\d{4})$")
        .expect("valid long date regex")
});

const ENGLISH_FORMATS: [&str; 6] = [
    "%B %d, %Y",
    "%b %d, %Y",
    "%A, %B %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
];

#[derive(Debug, Error, PartialEq)]
pub enum DateError {
    #[error("date is empty")]
    Empty,
    #[error("unrecognized date: {0}")]
    Unrecognized(String),
}

/// Calendar date of an event. Every external encoding is parsed into this
/// once; `DD/MM/YYYY` is produced only for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventDate(NaiveDate);

impl EventDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn parse(raw: &str) -> Result<Self, DateError> {
        let input = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if input.is_empty() {
            return Err(DateError::Empty);
        }

        if let Ok(date) = NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(&input) {
            return Ok(Self(dt.date_naive()));
        }
        if let Some(caps) = SLASH_RE.captures(&input) {
            let day = caps[1].parse::<u32>().ok();
            let month = caps[2].parse::<u32>().ok();
            let year = caps[3].parse::<i32>().ok();
            if let (Some(day), Some(month), Some(year)) = (day, month, year) {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    return Ok(Self(date));
                }
            }
            return Err(DateError::Unrecognized(input));
        }
        if let Some(caps) = PT_LONG_RE.captures(&input) {
            let day = caps[1].parse::<u32>().ok();
            let month = portuguese_month(&caps[2]);
            let year = caps[3].parse::<i32>().ok();
            if let (Some(day), Some(month), Some(year)) = (day, month, year) {
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                    return Ok(Self(date));
                }
            }
            return Err(DateError::Unrecognized(input));
        }
        for fmt in ENGLISH_FORMATS.iter() {
            if let Ok(date) = NaiveDate::parse_from_str(&input, fmt) {
                return Ok(Self(date));
            }
        }

        Err(DateError::Unrecognized(input))
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }

    /// `DD/MM/YYYY`
    pub fn display(&self) -> String {
        self.0.format("%d/%m/%Y").to_string()
    }

    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.0 < today
    }

    pub fn days_from(&self, today: NaiveDate) -> i64 {
        self.0.signed_duration_since(today).num_days()
    }
}

impl fmt::Display for EventDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl Serialize for EventDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.iso())
    }
}

impl<'de> Deserialize<'de> for EventDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        EventDate::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Accepts any stored date encoding and maps unparseable values to `None`
/// instead of failing the whole record.
pub fn lenient<'de, D>(deserializer: D) -> Result<Option<EventDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match EventDate::parse(&value) {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::warn!(value = %value, error = %err, "dropping unparseable event date");
            None
        }
    }))
}

pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

fn portuguese_month(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "janeiro" => 1,
        "fevereiro" => 2,
        "março" | "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(month)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> EventDate {
        EventDate::from_ymd(y, m, d).unwrap()
    }

    #[test]
    fn parses_day_first_slash_dates() {
        assert_eq!(EventDate::parse("15/03/2025").unwrap(), ymd(2025, 3, 15));
        assert_eq!(EventDate::parse("5/4/2025").unwrap(), ymd(2025, 4, 5));
        assert!(EventDate::parse("31/02/2025").is_err());
    }

    #[test]
    fn parses_iso_and_timestamps() {
        assert_eq!(EventDate::parse("2025-03-15").unwrap(), ymd(2025, 3, 15));
        assert_eq!(
            EventDate::parse("2025-03-15T07:00:00-03:00").unwrap(),
            ymd(2025, 3, 15)
        );
    }

    #[test]
    fn parses_long_forms() {
        assert_eq!(
            EventDate::parse("15 de março de 2025").unwrap(),
            ymd(2025, 3, 15)
        );
        assert_eq!(
            EventDate::parse("sábado, 7 de Junho de 2025").unwrap(),
            ymd(2025, 6, 7)
        );
        assert_eq!(EventDate::parse("March 15, 2025").unwrap(), ymd(2025, 3, 15));
        assert_eq!(EventDate::parse("15 March 2025").unwrap(), ymd(2025, 3, 15));
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        assert_eq!(EventDate::parse("  "), Err(DateError::Empty));
        assert!(EventDate::parse("next saturday").is_err());
        assert!(EventDate::parse("99 de foo de 2025").is_err());
    }

    #[test]
    fn displays_day_first() {
        assert_eq!(ymd(2025, 1, 9).display(), "09/01/2025");
        assert_eq!(ymd(2025, 1, 9).to_string(), "09/01/2025");
    }

    #[test]
    fn serializes_as_iso() {
        let json = serde_json::to_string(&ymd(2025, 12, 31)).unwrap();
        assert_eq!(json, "\"2025-12-31\"");
        let back: EventDate = serde_json::from_str("\"31/12/2025\"").unwrap();
        assert_eq!(back, ymd(2025, 12, 31));
    }

    #[test]
    fn past_is_strictly_before_today() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(ymd(2025, 5, 31).is_past(today));
        assert!(!ymd(2025, 6, 1).is_past(today));
        assert_eq!(ymd(2025, 6, 8).days_from(today), 7);
    }
}
