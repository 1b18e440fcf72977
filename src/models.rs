use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::dates::{self, EventDate};

const HALF_MARATHON_KM: f64 = 21.0975;
const MARATHON_KM: f64 = 42.195;
const ULTRA_KM: f64 = 50.0;
const KM_PER_MILE: f64 = 1.609344;

static DISTANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(km|kms|k|quil[oô]metros|mi|miles?|milhas?)\b")
        .expect("valid distance regex")
});

static BARE_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:[.,]\d+)?$").expect("valid number regex"));

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default, deserialize_with = "dates::lenient")]
    pub date: Option<EventDate>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub distances: Vec<Distance>,
    #[serde(default, deserialize_with = "lenient_event_type")]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub participants: u32,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Coordinates::new(latitude, longitude),
            _ => None,
        }
    }

    pub fn location_parts(&self) -> Option<LocationParts> {
        LocationParts::parse(&self.location)
    }

    pub fn category_label(&self) -> &'static str {
        self.event_type.map_or(UNCATEGORIZED, |kind| kind.label())
    }

    pub fn distance_labels(&self) -> String {
        self.distances
            .iter()
            .map(|d| d.label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn display_date(&self) -> String {
        self.date
            .map(|d| d.display())
            .unwrap_or_else(|| "TBA".to_string())
    }

    /// An event without a usable date is never considered past.
    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.date.map(|d| d.is_past(today)).unwrap_or(false)
    }

    pub fn spots_left(&self) -> Option<u32> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.participants))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "Official Race", alias = "official_race")]
    OfficialRace,
    #[serde(rename = "Training Run", alias = "training_run")]
    TrainingRun,
    #[serde(rename = "Charity Event", alias = "charity_event")]
    CharityEvent,
    #[serde(rename = "Virtual Run", alias = "virtual_run")]
    VirtualRun,
    #[serde(rename = "Trail Run", alias = "trail_run")]
    TrailRun,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::OfficialRace,
        EventType::TrainingRun,
        EventType::CharityEvent,
        EventType::VirtualRun,
        EventType::TrailRun,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EventType::OfficialRace => "Official Race",
            EventType::TrainingRun => "Training Run",
            EventType::CharityEvent => "Charity Event",
            EventType::VirtualRun => "Virtual Run",
            EventType::TrailRun => "Trail Run",
        }
    }
}

/// Label shown for events without a known category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Unknown or malformed stored categories become `None` instead of failing
/// the whole record.
fn lenient_event_type<'de, D>(deserializer: D) -> Result<Option<EventType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(value)) if value.trim().is_empty() => None,
        Some(serde_json::Value::String(value)) => match value.parse::<EventType>() {
            Ok(kind) => Some(kind),
            Err(err) => {
                tracing::warn!(value = %value, error = %err, "dropping unknown event type");
                None
            }
        },
        Some(other) => {
            tracing::warn!(value = %other, "dropping malformed event type");
            None
        }
    })
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ");
        let kind = match key.as_str() {
            "official race" | "official" | "race" | "corrida oficial" | "corrida" => {
                EventType::OfficialRace
            }
            "training run" | "training" | "treino" => EventType::TrainingRun,
            "charity event" | "charity" | "beneficente" => EventType::CharityEvent,
            "virtual run" | "virtual" | "corrida virtual" => EventType::VirtualRun,
            "trail run" | "trail" | "trilha" | "corrida de trilha" => EventType::TrailRun,
            _ => return Err(format!("unknown event type: {s}")),
        };
        Ok(kind)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    Kilometers,
    Miles,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: DistanceUnit,
}

impl Quantity {
    pub fn kilometers(&self) -> f64 {
        match self.unit {
            DistanceUnit::Kilometers => self.value,
            DistanceUnit::Miles => self.value * KM_PER_MILE,
        }
    }
}

/// Race distance tag. `quantity` is `None` for tags that carry no length
/// ("Kids Run", "Relay").
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Distance {
    pub label: String,
    #[serde(default)]
    pub quantity: Option<Quantity>,
}

impl Distance {
    pub fn parse(label: &str) -> Self {
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        let quantity = parse_quantity(&label);
        Self { label, quantity }
    }

    /// Splits a comma (or semicolon) joined tag string.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Distance::parse)
            .collect()
    }

    pub fn kilometers(&self) -> Option<f64> {
        self.quantity.map(|q| q.kilometers())
    }

    /// Whole-kilometre comparison when both sides have a length, so "21K",
    /// "21.1 km" and "Half Marathon" are the same race. Tags without a length
    /// fall back to label containment, with the 42/21 aliases.
    pub fn matches(&self, wanted: &Distance) -> bool {
        if let (Some(have), Some(want)) = (self.kilometers(), wanted.kilometers()) {
            return have.round() as i64 == want.round() as i64;
        }
        let haystack = self.label.to_lowercase();
        let needle = wanted.label.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        if haystack.contains(&needle) {
            return true;
        }
        match alias_for(&needle) {
            Some(alias) => haystack.contains(alias),
            None => false,
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn is_half(lower: &str) -> bool {
    lower.contains("half") || lower.contains("meia")
}

fn is_full(lower: &str) -> bool {
    lower.contains("marathon") || lower.contains("maratona")
}

fn alias_for(lower: &str) -> Option<&'static str> {
    if is_half(lower) {
        Some("21")
    } else if is_full(lower) {
        Some("42")
    } else {
        None
    }
}

fn parse_quantity(label: &str) -> Option<Quantity> {
    let lower = label.to_lowercase();
    if let Some(caps) = DISTANCE_RE.captures(&lower) {
        let value = caps[1].replace(',', ".").parse::<f64>().ok()?;
        let unit = if caps[2].starts_with('m') {
            DistanceUnit::Miles
        } else {
            DistanceUnit::Kilometers
        };
        return Some(Quantity { value, unit });
    }
    if BARE_NUMBER_RE.is_match(&lower) {
        let value = lower.replace(',', ".").parse::<f64>().ok()?;
        return Some(Quantity {
            value,
            unit: DistanceUnit::Kilometers,
        });
    }
    let km = if is_half(&lower) && is_full(&lower) {
        HALF_MARATHON_KM
    } else if is_full(&lower) && !lower.contains("ultra") {
        MARATHON_KM
    } else if lower.contains("ultra") {
        ULTRA_KM
    } else {
        return None;
    };
    Some(Quantity {
        value: km,
        unit: DistanceUnit::Kilometers,
    })
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Price {
    #[default]
    Free,
    Amount { cents: i64, currency: String },
}

impl Price {
    /// Bare numbers are taken as reais.
    pub const DEFAULT_CURRENCY: &'static str = "BRL";

    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        let lower = text.to_lowercase();
        if text.is_empty()
            || matches!(lower.as_str(), "free" | "grátis" | "gratis" | "gratuito")
        {
            return Some(Price::Free);
        }

        let (currency, rest) = split_currency(text);
        let number = normalize_number(rest.trim())?;
        let value = number.parse::<f64>().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let cents = (value * 100.0).round() as i64;
        if cents == 0 {
            return Some(Price::Free);
        }
        Some(Price::Amount {
            cents,
            currency: currency.to_string(),
        })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Price::Free)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Free => f.write_str("Free"),
            Price::Amount { cents, currency } => {
                let symbol = match currency.as_str() {
                    "BRL" => "R$ ",
                    "USD" => "$",
                    "EUR" => "€",
                    "GBP" => "£",
                    other => return write!(f, "{other} {}.{:02}", cents / 100, cents % 100),
                };
                write!(f, "{symbol}{}.{:02}", cents / 100, cents % 100)
            }
        }
    }
}

fn split_currency(text: &str) -> (&'static str, &str) {
    const PREFIXES: [(&str, &str); 7] = [
        ("R$", "BRL"),
        ("US$", "USD"),
        ("USD", "USD"),
        ("BRL", "BRL"),
        ("$", "USD"),
        ("€", "EUR"),
        ("£", "GBP"),
    ];
    for (prefix, code) in PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            return (code, rest);
        }
    }
    (Price::DEFAULT_CURRENCY, text)
}

/// "1.234,56" and "1,234.56" both become "1234.56".
fn normalize_number(text: &str) -> Option<String> {
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    let last_comma = text.rfind(',');
    let last_dot = text.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => text.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => text.replace(',', ""),
        (Some(_), None) => text.replace(',', "."),
        _ => text.to_string(),
    };
    Some(normalized)
}

/// Naive split of a free-text location. "Place, City, State" yields the
/// second-to-last segment as city; "City, State" the first.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LocationParts {
    pub place: Option<String>,
    pub city: String,
    pub region: Option<String>,
}

impl LocationParts {
    pub fn parse(location: &str) -> Option<Self> {
        let mut segments: Vec<String> = location
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() == 1 {
            if let Some((city, region)) = segments[0].split_once(" - ") {
                segments = vec![city.trim().to_string(), region.trim().to_string()];
            }
        }
        match segments.len() {
            0 => None,
            1 => Some(Self {
                place: None,
                city: segments.remove(0),
                region: None,
            }),
            2 => {
                let region = segments.pop();
                Some(Self {
                    place: None,
                    city: segments.remove(0),
                    region,
                })
            }
            _ => {
                let region = segments.pop();
                let city = segments.pop().unwrap_or_default();
                Some(Self {
                    place: Some(segments.join(", ")),
                    city,
                    region,
                })
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Runner,
    Organizer,
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "runner" => Ok(Role::Runner),
            "organizer" => Ok(Role::Organizer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

/// Raw form payload for creating or overwriting an event. Also the shape of
/// the auto-saved draft.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct NewEvent {
    pub title: String,
    pub date: String,
    pub time: Option<String>,
    pub location: String,
    pub distance: String,
    pub capacity: Option<i64>,
    pub description: String,
    pub image_url: Option<String>,
    pub price: String,
    pub event_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub organizer: Option<String>,
}
