use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates::EventDate;
use crate::models::{Distance, Event, EventType};

pub const DEFAULT_RADIUS_KM: f64 = 25.0;

pub const BUCKET_KEYS: [&str; 6] = [
    "TODAY",
    "THIS_WEEK",
    "NEXT_WEEK",
    "THIS_MONTH",
    "NEXT_MONTH",
    "LATER",
];

/// User-selected constraints narrowing the visible event list. Groups are
/// ANDed together; values inside a multi-value group are ORed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub keyword: String,
    pub distances: Vec<String>,
    pub event_types: Vec<EventType>,
    pub location: String,
    /// Advisory only, never used to compute geographic distance.
    pub radius_km: f64,
    pub date_from: Option<EventDate>,
    pub date_to: Option<EventDate>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            distances: Vec::new(),
            event_types: Vec::new(),
            location: String::new(),
            radius_km: DEFAULT_RADIUS_KM,
            date_from: None,
            date_to: None,
        }
    }
}

impl FilterCriteria {
    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Number of active criteria groups.
    pub fn active_count(&self) -> usize {
        [
            !self.keyword.trim().is_empty(),
            !self.distances.is_empty(),
            !self.event_types.is_empty(),
            !self.location.trim().is_empty(),
            self.date_from.is_some() || self.date_to.is_some(),
        ]
        .iter()
        .filter(|active| **active)
        .count()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn toggle_distance(&mut self, distance: &str) {
        if let Some(pos) = self.distances.iter().position(|d| d == distance) {
            self.distances.remove(pos);
        } else {
            self.distances.push(distance.to_string());
        }
    }

    pub fn toggle_event_type(&mut self, kind: EventType) {
        if let Some(pos) = self.event_types.iter().position(|k| *k == kind) {
            self.event_types.remove(pos);
        } else {
            self.event_types.push(kind);
        }
    }

    pub fn compile(&self) -> Matcher<'_> {
        let keyword = self.keyword.trim().to_lowercase();
        let location = self.location.trim().to_lowercase();
        Matcher {
            criteria: self,
            keyword,
            location,
            distances: self.distances.iter().map(|d| Distance::parse(d)).collect(),
        }
    }
}

/// Criteria with their per-call normalization done once.
pub struct Matcher<'a> {
    criteria: &'a FilterCriteria,
    keyword: String,
    location: String,
    distances: Vec<Distance>,
}

impl Matcher<'_> {
    pub fn matches(&self, event: &Event) -> bool {
        self.matches_keyword(event)
            && self.matches_distance(event)
            && self.matches_type(event)
            && self.matches_location(event)
            && self.matches_dates(event)
    }

    fn matches_keyword(&self, event: &Event) -> bool {
        if self.keyword.is_empty() {
            return true;
        }
        [
            event.title.as_str(),
            event.location.as_str(),
            event.description.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&self.keyword))
    }

    fn matches_distance(&self, event: &Event) -> bool {
        if self.distances.is_empty() {
            return true;
        }
        self.distances
            .iter()
            .any(|wanted| event.distances.iter().any(|have| have.matches(wanted)))
    }

    fn matches_type(&self, event: &Event) -> bool {
        self.criteria.event_types.is_empty()
            || event
                .event_type
                .is_some_and(|kind| self.criteria.event_types.contains(&kind))
    }

    fn matches_location(&self, event: &Event) -> bool {
        if self.location.is_empty() {
            return true;
        }
        let Some(parts) = event.location_parts() else {
            return false;
        };
        let same = |value: &str| value.to_lowercase() == self.location;
        same(&parts.city)
            || parts.region.as_deref().map(same).unwrap_or(false)
            || event.location.to_lowercase().contains(&self.location)
    }

    /// Inclusive at both ends.
    fn matches_dates(&self, event: &Event) -> bool {
        let (from, to) = (self.criteria.date_from, self.criteria.date_to);
        if from.is_none() && to.is_none() {
            return true;
        }
        let Some(date) = event.date else {
            return false;
        };
        from.map(|f| date >= f).unwrap_or(true) && to.map(|t| date <= t).unwrap_or(true)
    }
}

/// Returns the events matching `criteria`, in their original order.
pub fn apply(events: &[Event], criteria: &FilterCriteria) -> Vec<Event> {
    matching(events, criteria).cloned().collect()
}

pub fn matching<'a>(
    events: &'a [Event],
    criteria: &'a FilterCriteria,
) -> impl Iterator<Item = &'a Event> + 'a {
    let matcher = criteria.compile();
    events.iter().filter(move |event| matcher.matches(event))
}

/// Date ascending, undated last, then title.
pub fn compare_by_date(a: &Event, b: &Event) -> Ordering {
    match (a.date, b.date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.title.cmp(&b.title))
}

pub fn sort_by_date(events: &mut [Event]) {
    events.sort_by(compare_by_date);
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketItem {
    pub days_until: i64,
    pub event: Event,
}

/// Groups upcoming events for the calendar view. Past and undated events are
/// skipped; each bucket is date ordered.
pub fn upcoming_buckets(
    events: &[Event],
    today: NaiveDate,
) -> HashMap<&'static str, Vec<BucketItem>> {
    let mut buckets: HashMap<&'static str, Vec<BucketItem>> =
        BUCKET_KEYS.iter().map(|key| (*key, Vec::new())).collect();

    for event in events {
        let Some(date) = event.date else {
            continue;
        };
        let days_until = date.days_from(today);
        if days_until < 0 {
            continue;
        }
        if let Some(bucket) = buckets.get_mut(bucket_for(days_until)) {
            bucket.push(BucketItem {
                days_until,
                event: event.clone(),
            });
        }
    }

    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| compare_by_date(&a.event, &b.event));
    }

    buckets
}

fn bucket_for(days_until: i64) -> &'static str {
    match days_until {
        d if d <= 0 => "TODAY",
        d if d < 7 => "THIS_WEEK",
        d if d < 14 => "NEXT_WEEK",
        d if d < 30 => "THIS_MONTH",
        d if d < 60 => "NEXT_MONTH",
        _ => "LATER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;
    use chrono::Utc;

    fn event(id: &str, title: &str, date: Option<&str>, location: &str) -> Event {
        Event {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            organizer: None,
            date: date.and_then(|d| EventDate::parse(d).ok()),
            time: None,
            location: location.to_string(),
            latitude: None,
            longitude: None,
            distances: Distance::parse_list("5K, 10K"),
            event_type: Some(EventType::OfficialRace),
            capacity: None,
            participants: 0,
            price: Default::default(),
            image_url: None,
            creator_id: None,
            created_at: Utc::now(),
        }
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn empty_criteria_returns_everything_in_order() {
        let events = seed::default_events();
        let criteria = FilterCriteria::default();
        assert!(criteria.is_empty());
        let out = apply(&events, &criteria);
        assert_eq!(out, events);
    }

    #[test]
    fn type_filter_excludes_other_types() {
        let mut events = vec![event("a", "A", None, "X"), event("b", "B", None, "Y")];
        for e in &mut events {
            e.event_type = Some(EventType::TrailRun);
        }
        let criteria = FilterCriteria {
            event_types: vec![EventType::CharityEvent],
            ..Default::default()
        };
        assert!(apply(&events, &criteria).is_empty());
    }

    #[test]
    fn half_marathon_filter_matches_21k_event() {
        let mut e = event("a", "Night Run", None, "Recife, PE");
        e.distances = Distance::parse_list("21K");
        let criteria = FilterCriteria {
            distances: vec!["Half Marathon".to_string()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&[e], &criteria)), vec!["a"]);
    }

    #[test]
    fn distance_values_are_ored() {
        let mut a = event("a", "A", None, "X");
        a.distances = Distance::parse_list("42K");
        let b = event("b", "B", None, "X");
        let criteria = FilterCriteria {
            distances: vec!["Marathon".into(), "10K".into()],
            ..Default::default()
        };
        assert_eq!(ids(&apply(&[a, b], &criteria)), vec!["a", "b"]);
    }

    #[test]
    fn unparseable_dates_are_excluded_from_ranges() {
        let events = vec![
            event("dated", "A", Some("10/05/2025"), "X"),
            event("undated", "B", Some("someday"), "X"),
            event("missing", "C", None, "X"),
        ];
        let criteria = FilterCriteria {
            date_from: EventDate::from_ymd(2025, 5, 1),
            ..Default::default()
        };
        assert_eq!(ids(&apply(&events, &criteria)), vec!["dated"]);
    }

    #[test]
    fn date_range_is_inclusive_on_both_ends() {
        let events = vec![
            event("before", "A", Some("30/04/2025"), "X"),
            event("first", "B", Some("01/05/2025"), "X"),
            event("last", "C", Some("31/05/2025"), "X"),
            event("after", "D", Some("01/06/2025"), "X"),
        ];
        let criteria = FilterCriteria {
            date_from: EventDate::from_ymd(2025, 5, 1),
            date_to: EventDate::from_ymd(2025, 5, 31),
            ..Default::default()
        };
        assert_eq!(ids(&apply(&events, &criteria)), vec!["first", "last"]);
    }

    #[test]
    fn location_matches_city_region_or_text() {
        let events = vec![
            event("sp", "A", None, "Parque Ibirapuera, São Paulo, SP"),
            event("rj", "B", None, "Rio de Janeiro, RJ"),
            event("nowhere", "C", None, ""),
        ];
        let by_region = FilterCriteria {
            location: "sp".into(),
            ..Default::default()
        };
        assert_eq!(ids(&apply(&events, &by_region)), vec!["sp"]);

        let by_text = FilterCriteria {
            location: "janeiro".into(),
            ..Default::default()
        };
        assert_eq!(ids(&apply(&events, &by_text)), vec!["rj"]);
    }

    #[test]
    fn keyword_maratona_on_seed_data() {
        let events = seed::default_events();
        let criteria = FilterCriteria {
            keyword: "MARATONA".into(),
            ..Default::default()
        };
        let out = apply(&events, &criteria);
        let expected: Vec<&Event> = events
            .iter()
            .filter(|e| {
                [&e.title, &e.location, &e.description]
                    .iter()
                    .any(|f| f.to_lowercase().contains("maratona"))
            })
            .collect();
        assert!(!out.is_empty());
        assert_eq!(out.iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn keyword_ignores_category_label() {
        let events = seed::default_events();
        let criteria = FilterCriteria {
            keyword: "charity".into(),
            ..Default::default()
        };
        assert!(ids(&apply(&events, &criteria)).is_empty());
    }

    #[test]
    fn counts_active_groups() {
        let mut criteria = FilterCriteria {
            keyword: "run".into(),
            date_to: EventDate::from_ymd(2025, 1, 1),
            ..Default::default()
        };
        criteria.toggle_event_type(EventType::TrailRun);
        assert_eq!(criteria.active_count(), 3);
        criteria.toggle_event_type(EventType::TrailRun);
        assert_eq!(criteria.active_count(), 2);
        criteria.clear();
        assert!(criteria.is_empty());
        assert_eq!(criteria.radius_km, DEFAULT_RADIUS_KM);
    }

    #[test]
    fn buckets_skip_past_events() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let events = vec![
            event("past", "A", Some("30/04/2025"), "X"),
            event("today", "B", Some("01/05/2025"), "X"),
            event("week", "C", Some("05/05/2025"), "X"),
            event("later", "D", Some("01/09/2025"), "X"),
        ];
        let buckets = upcoming_buckets(&events, today);
        assert_eq!(buckets["TODAY"].len(), 1);
        assert_eq!(buckets["THIS_WEEK"][0].days_until, 4);
        assert_eq!(buckets["LATER"][0].event.id, "later");
        let total: usize = buckets.values().map(Vec::len).sum();
        assert_eq!(total, 3);
    }
}
