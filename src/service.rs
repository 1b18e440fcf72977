use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::dates::EventDate;
use crate::db::{EventRepository, StoreError};
use crate::filter::{self, FilterCriteria};
use crate::models::{Coordinates, Distance, Event, EventType, NewEvent, Price, Role, User};
use crate::utils::clean_text;

pub const MIN_TITLE_LEN: usize = 3;
pub const MAX_TITLE_LEN: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Field-tagged validation failures, rendered inline next to each input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid event: {0}")]
    Validation(FieldErrors),
    #[error("not allowed to modify event {0}")]
    Forbidden(String),
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Toast shown after a CRUD call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Success(String),
    Failure(String),
}

impl Notice {
    pub fn from_result<T>(result: &Result<T, ServiceError>, success: &str) -> Self {
        match result {
            Ok(_) => Notice::Success(success.to_string()),
            Err(err) => Notice::Failure(err.to_string()),
        }
    }
}

/// Event as shown in list, grid and calendar views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    pub id: String,
    pub title: String,
    pub date: String,
    pub time: Option<String>,
    pub location: String,
    pub distance: String,
    pub event_type: String,
    pub price: String,
    pub is_free: bool,
    pub capacity: Option<u32>,
    pub participants: u32,
    pub image_url: Option<String>,
}

impl From<&Event> for EventView {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            date: event.display_date(),
            time: event.time.clone(),
            location: event.location.clone(),
            distance: event.distance_labels(),
            event_type: event.category_label().to_string(),
            price: event.price.to_string(),
            is_free: event.price.is_free(),
            capacity: event.capacity,
            participants: event.participants,
            image_url: event.image_url.clone(),
        }
    }
}

struct Validated {
    title: String,
    date: EventDate,
    location: String,
    distances: Vec<Distance>,
    capacity: Option<u32>,
    price: Price,
    event_type: Option<EventType>,
    coordinates: Option<Coordinates>,
}

fn validate(draft: &NewEvent) -> Result<Validated, ServiceError> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: &str| {
        errors.push(FieldError {
            field,
            message: message.to_string(),
        })
    };

    let title = clean_text(&draft.title);
    if title.chars().count() < MIN_TITLE_LEN {
        fail("title", "must be at least 3 characters");
    } else if title.chars().count() > MAX_TITLE_LEN {
        fail("title", "must be at most 120 characters");
    }

    let date = match EventDate::parse(&draft.date) {
        Ok(date) => Some(date),
        Err(_) => {
            fail("date", "is not a valid date");
            None
        }
    };

    let location = clean_text(&draft.location);
    if location.is_empty() {
        fail("location", "is required");
    }

    let distances = Distance::parse_list(&draft.distance);
    if distances.is_empty() {
        fail("distance", "select at least one distance");
    }

    let capacity = match draft.capacity {
        None => None,
        Some(value) => match u32::try_from(value) {
            Ok(value) => Some(value),
            Err(_) => {
                fail("capacity", "must not be negative");
                None
            }
        },
    };

    let price = Price::parse(&draft.price);
    if price.is_none() {
        fail("price", "is not a valid amount");
    }

    let event_type = if draft.event_type.trim().is_empty() {
        None
    } else {
        match draft.event_type.parse::<EventType>() {
            Ok(kind) => Some(kind),
            Err(_) => {
                fail("event_type", "is not a known event type");
                None
            }
        }
    };

    let coordinates = match (draft.latitude, draft.longitude) {
        (None, None) => None,
        (Some(lat), Some(lon)) => {
            let coords = Coordinates::new(lat, lon);
            if coords.is_none() {
                fail("coordinates", "are out of range");
            }
            coords
        }
        _ => {
            fail("coordinates", "need both latitude and longitude");
            None
        }
    };

    if let Some(url) = draft.image_url.as_deref().filter(|u| !u.trim().is_empty()) {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("data:image/")) {
            fail("image_url", "must be a web address or an uploaded image");
        }
    }

    match (date, price) {
        (Some(date), Some(price)) if errors.is_empty() => Ok(Validated {
            title,
            date,
            location,
            distances,
            capacity,
            price,
            event_type,
            coordinates,
        }),
        _ => Err(ServiceError::Validation(FieldErrors(errors))),
    }
}

pub fn new_event_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("evt_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

fn can_modify(event: &Event, actor: Option<&User>) -> bool {
    match (&event.creator_id, actor) {
        (None, _) => true,
        (Some(_), Some(user)) if user.role == Role::Admin => true,
        (Some(owner), Some(user)) => *owner == user.id,
        (Some(_), None) => false,
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub struct EventService {
    repo: Arc<dyn EventRepository>,
}

impl EventService {
    pub fn new(repo: Arc<dyn EventRepository>) -> Self {
        Self { repo }
    }

    pub fn events(&self) -> Result<Vec<Event>, ServiceError> {
        Ok(self.repo.list_events()?)
    }

    /// All events, formatted for display.
    pub fn all(&self) -> Result<Vec<EventView>, ServiceError> {
        Ok(self.events()?.iter().map(EventView::from).collect())
    }

    pub fn search(&self, criteria: &FilterCriteria) -> Result<Vec<Event>, ServiceError> {
        let events = self.events()?;
        Ok(filter::apply(&events, criteria))
    }

    pub fn get(&self, id: &str) -> Result<Event, ServiceError> {
        self.repo
            .get_event(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub fn my_events(&self, user_id: &str) -> Result<Vec<Event>, ServiceError> {
        Ok(self.repo.list_events_by_creator(user_id)?)
    }

    pub fn create(&self, draft: &NewEvent, creator: Option<&User>) -> Result<Event, ServiceError> {
        let fields = validate(draft)?;
        let event = Event {
            id: new_event_id(),
            title: fields.title,
            description: draft.description.trim().to_string(),
            organizer: non_empty(&draft.organizer)
                .or_else(|| creator.map(|u| u.display_name.clone())),
            date: Some(fields.date),
            time: non_empty(&draft.time),
            location: fields.location,
            latitude: fields.coordinates.map(|c| c.latitude),
            longitude: fields.coordinates.map(|c| c.longitude),
            distances: fields.distances,
            event_type: fields.event_type,
            capacity: fields.capacity,
            participants: 0,
            price: fields.price,
            image_url: non_empty(&draft.image_url),
            creator_id: creator.map(|u| u.id.clone()),
            created_at: Utc::now(),
        };
        self.repo.insert_event(&event)?;
        tracing::info!(event_id = %event.id, title = %event.title, "event created");
        Ok(event)
    }

    /// Overwrites the mutable fields. Identity, creator, creation time and
    /// participant count are kept.
    pub fn update(
        &self,
        id: &str,
        draft: &NewEvent,
        actor: Option<&User>,
    ) -> Result<Event, ServiceError> {
        let current = self.get(id)?;
        if !can_modify(&current, actor) {
            return Err(ServiceError::Forbidden(id.to_string()));
        }
        let fields = validate(draft)?;
        let event = Event {
            title: fields.title,
            description: draft.description.trim().to_string(),
            organizer: non_empty(&draft.organizer).or(current.organizer.clone()),
            date: Some(fields.date),
            time: non_empty(&draft.time),
            location: fields.location,
            latitude: fields.coordinates.map(|c| c.latitude),
            longitude: fields.coordinates.map(|c| c.longitude),
            distances: fields.distances,
            event_type: fields.event_type,
            capacity: fields.capacity,
            price: fields.price,
            image_url: non_empty(&draft.image_url),
            ..current
        };
        self.repo.update_event(&event)?;
        tracing::info!(event_id = %event.id, "event updated");
        Ok(event)
    }

    pub fn delete(&self, id: &str, actor: Option<&User>) -> Result<(), ServiceError> {
        let current = self.get(id)?;
        if !can_modify(&current, actor) {
            return Err(ServiceError::Forbidden(id.to_string()));
        }
        self.repo.delete_event(id)?;
        tracing::info!(event_id = %id, "event deleted");
        Ok(())
    }
}

/// The list a view holds in memory. Only changed after the backend call
/// succeeded.
#[derive(Debug, Clone, Default)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn replace(&mut self, event: Event) -> bool {
        match self.events.iter_mut().find(|e| e.id == event.id) {
            Some(slot) => {
                *slot = event;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Event> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    pub fn visible(&self, criteria: &FilterCriteria) -> Vec<Event> {
        filter::apply(&self.events, criteria)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, Store};
    use crate::seed;

    fn draft() -> NewEvent {
        NewEvent {
            title: "Corrida do Parque".into(),
            date: "2025-08-17".into(),
            time: Some("07:00".into()),
            location: "Parque Barigui, Curitiba, PR".into(),
            distance: "5K, 10K".into(),
            capacity: Some(500),
            description: "Prova de rua no parque.".into(),
            price: "R$ 70,00".into(),
            event_type: "Official Race".into(),
            ..Default::default()
        }
    }

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            email: format!("{id}@example.com"),
            display_name: id.to_uppercase(),
            phone: None,
            role,
            created_at: Utc::now(),
        }
    }

    fn service() -> EventService {
        EventService::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn created_event_lists_with_display_date() {
        let svc = service();
        let created = svc.create(&draft(), None).unwrap();
        assert!(created.id.starts_with("evt_"));

        let all = svc.all().unwrap();
        let view = all.iter().find(|v| v.id == created.id).unwrap();
        assert_eq!(view.title, "Corrida do Parque");
        assert_eq!(view.date, "17/08/2025");
        assert_eq!(view.price, "R$ 70.00");
        assert!(!view.is_free);
    }

    #[test]
    fn validation_reports_every_bad_field() {
        let bad = NewEvent {
            title: "ab".into(),
            date: "31/02/2025".into(),
            location: " ".into(),
            distance: String::new(),
            capacity: Some(-5),
            price: "lots".into(),
            event_type: "parade".into(),
            latitude: Some(10.0),
            image_url: Some("ftp://x".into()),
            ..Default::default()
        };
        match service().create(&bad, None) {
            Err(ServiceError::Validation(errors)) => {
                for field in [
                    "title",
                    "date",
                    "location",
                    "distance",
                    "capacity",
                    "price",
                    "event_type",
                    "coordinates",
                    "image_url",
                ] {
                    assert!(errors.get(field).is_some(), "missing error for {field}");
                }
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn capacity_may_be_zero_but_not_negative() {
        let svc = service();
        let mut open = draft();
        open.capacity = Some(0);
        assert_eq!(svc.create(&open, None).unwrap().capacity, Some(0));

        let mut negative = draft();
        negative.capacity = Some(-1);
        match svc.create(&negative, None) {
            Err(ServiceError::Validation(errors)) => {
                assert_eq!(errors.get("capacity"), Some("must not be negative"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn category_is_optional() {
        let svc = service();
        let mut plain = draft();
        plain.event_type = "  ".into();
        let event = svc.create(&plain, None).unwrap();
        assert_eq!(event.event_type, None);
        let view = EventView::from(&event);
        assert_eq!(view.event_type, "Uncategorized");
    }

    #[test]
    fn only_creator_or_admin_may_modify() {
        let svc = service();
        let owner = user("owner", Role::Organizer);
        let stranger = user("stranger", Role::Runner);
        let admin = user("admin", Role::Admin);
        let event = svc.create(&draft(), Some(&owner)).unwrap();
        assert_eq!(event.organizer.as_deref(), Some("OWNER"));

        let mut edit = draft();
        edit.title = "Corrida do Parque 2".into();
        assert!(matches!(
            svc.update(&event.id, &edit, Some(&stranger)),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            svc.delete(&event.id, None),
            Err(ServiceError::Forbidden(_))
        ));

        let updated = svc.update(&event.id, &edit, Some(&owner)).unwrap();
        assert_eq!(updated.title, "Corrida do Parque 2");
        assert_eq!(updated.creator_id.as_deref(), Some("owner"));
        assert_eq!(updated.created_at, event.created_at);

        assert_eq!(svc.my_events("owner").unwrap().len(), 1);
        svc.delete(&event.id, Some(&admin)).unwrap();
        assert!(matches!(svc.get(&event.id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn delete_keeps_order_of_remaining_events() {
        let events = seed::default_events();
        let svc = EventService::new(Arc::new(MemoryStore::with_events(events.clone())));
        let mut list = EventList::new(svc.events().unwrap());
        let before: Vec<String> = list.as_slice().iter().map(|e| e.id.clone()).collect();
        let victim = before[3].clone();

        let result = svc.delete(&victim, None);
        assert_eq!(
            Notice::from_result(&result, "Event deleted"),
            Notice::Success("Event deleted".into())
        );
        list.remove(&victim).unwrap();

        let expected: Vec<String> = before.into_iter().filter(|id| *id != victim).collect();
        let after: Vec<String> = list.as_slice().iter().map(|e| e.id.clone()).collect();
        assert_eq!(after, expected);
        let stored: Vec<String> = svc.events().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(stored, expected);
    }

    #[test]
    fn failed_calls_become_failure_notices() {
        let svc = service();
        let result = svc.delete("missing", None);
        assert!(matches!(
            Notice::from_result(&result, "Event deleted"),
            Notice::Failure(_)
        ));
    }

    #[test]
    fn list_replace_and_visible() {
        let mut list = EventList::new(seed::default_events());
        let mut changed = list.as_slice()[0].clone();
        changed.title = "Renamed".into();
        assert!(list.replace(changed));
        let criteria = FilterCriteria {
            keyword: "renamed".into(),
            ..Default::default()
        };
        assert_eq!(list.visible(&criteria).len(), 1);
        assert!(list.remove("nope").is_none());
    }
}
