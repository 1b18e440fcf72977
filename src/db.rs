use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter;
use crate::models::{Event, User};
use crate::seed;
use crate::utils;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
}

/// Stored password material plus the pending tokens of the account flows.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Credentials {
    pub salt: String,
    pub digest: String,
    pub confirmed: bool,
    pub confirmation_token: Option<String>,
    pub reset_token: Option<String>,
}

pub trait EventRepository: Send + Sync {
    /// Date ascending, undated last, then title.
    fn list_events(&self) -> Result<Vec<Event>, StoreError>;
    fn get_event(&self, id: &str) -> Result<Option<Event>, StoreError>;
    fn insert_event(&self, event: &Event) -> Result<(), StoreError>;
    /// Full overwrite of the stored record.
    fn update_event(&self, event: &Event) -> Result<(), StoreError>;
    fn delete_event(&self, id: &str) -> Result<(), StoreError>;
    fn list_events_by_creator(&self, creator_id: &str) -> Result<Vec<Event>, StoreError>;
}

pub trait UserRepository: Send + Sync {
    fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    fn insert_user(&self, user: &User, credentials: &Credentials) -> Result<(), StoreError>;
    fn update_user(&self, user: &User) -> Result<(), StoreError>;
    fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>, StoreError>;
    fn put_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<(), StoreError>;
}

fn require(value: &str, name: &'static str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        Err(StoreError::InvalidArgument(name))
    } else {
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: String) -> rusqlite::Result<T> {
    serde_json::from_str(&payload).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            payload.len(),
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open_default() -> Result<Self, StoreError> {
        let store = Self::open(&utils::database_path())?;
        store.seed_if_empty()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                date TEXT,
                creator_id TEXT,
                payload TEXT NOT NULL,
                created_at_utc TEXT NOT NULL,
                updated_at_utc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_date ON events(date);
            CREATE INDEX IF NOT EXISTS events_creator ON events(creator_id);
            CREATE TABLE IF NOT EXISTS users(
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS credentials(
                user_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn seed_if_empty(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }

        let samples = seed::default_events();
        for event in &samples {
            self.insert_event(event)?;
        }
        tracing::info!(count = samples.len(), "seeded demo events");
        Ok(samples.len())
    }

    fn query_events(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| decode::<Event>(row.get(0)?))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl EventRepository for Store {
    fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        self.query_events(
            "SELECT payload FROM events ORDER BY date IS NULL, date ASC, title ASC",
            &[],
        )
    }

    fn get_event(&self, id: &str) -> Result<Option<Event>, StoreError> {
        require(id, "event id")?;
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        require(&event.id, "event id")?;
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(event)?;
        let inserted = self.conn().execute(
            "INSERT INTO events (id, title, date, creator_id, payload, created_at_utc, updated_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                event.id,
                event.title,
                event.date.map(|d| d.iso()),
                event.creator_id,
                payload,
                now
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict(event.id.clone()));
        }
        Ok(())
    }

    fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        require(&event.id, "event id")?;
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(event)?;
        let changed = self.conn().execute(
            "UPDATE events SET title = ?2, date = ?3, creator_id = ?4, payload = ?5, updated_at_utc = ?6
             WHERE id = ?1",
            params![
                event.id,
                event.title,
                event.date.map(|d| d.iso()),
                event.creator_id,
                payload,
                now
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(event.id.clone()));
        }
        Ok(())
    }

    fn delete_event(&self, id: &str) -> Result<(), StoreError> {
        require(id, "event id")?;
        let changed = self
            .conn()
            .execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn list_events_by_creator(&self, creator_id: &str) -> Result<Vec<Event>, StoreError> {
        require(creator_id, "creator id")?;
        self.query_events(
            "SELECT payload FROM events WHERE creator_id = ?1
             ORDER BY date IS NULL, date ASC, title ASC",
            &[&creator_id],
        )
    }
}

impl UserRepository for Store {
    fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        require(id, "user id")?;
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM users WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        require(email, "email")?;
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM users WHERE email = ?1",
                params![email.trim().to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn insert_user(&self, user: &User, credentials: &Credentials) -> Result<(), StoreError> {
        require(&user.id, "user id")?;
        require(&user.email, "email")?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO users (id, email, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![
                user.id,
                user.email.trim().to_lowercase(),
                serde_json::to_string(user)?
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict(user.email.clone()));
        }
        tx.execute(
            "INSERT INTO credentials (user_id, payload) VALUES (?1, ?2)",
            params![user.id, serde_json::to_string(credentials)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_user(&self, user: &User) -> Result<(), StoreError> {
        require(&user.id, "user id")?;
        let changed = self.conn().execute(
            "UPDATE users SET payload = ?2 WHERE id = ?1",
            params![user.id, serde_json::to_string(user)?],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(user.id.clone()));
        }
        Ok(())
    }

    fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>, StoreError> {
        require(user_id, "user id")?;
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM credentials WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn put_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<(), StoreError> {
        require(user_id, "user id")?;
        self.conn().execute(
            "INSERT INTO credentials (user_id, payload) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload",
            params![user_id, serde_json::to_string(credentials)?],
        )?;
        Ok(())
    }
}

/// In-memory repository for tests and storage-less runs.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<Event>>,
    users: Mutex<Vec<(User, Credentials)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
            users: Mutex::new(Vec::new()),
        }
    }

    fn events(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn users(&self) -> std::sync::MutexGuard<'_, Vec<(User, Credentials)>> {
        self.users
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventRepository for MemoryStore {
    fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut events = self.events().clone();
        filter::sort_by_date(&mut events);
        Ok(events)
    }

    fn get_event(&self, id: &str) -> Result<Option<Event>, StoreError> {
        require(id, "event id")?;
        Ok(self.events().iter().find(|e| e.id == id).cloned())
    }

    fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        require(&event.id, "event id")?;
        let mut events = self.events();
        if events.iter().any(|e| e.id == event.id) {
            return Err(StoreError::Conflict(event.id.clone()));
        }
        events.push(event.clone());
        Ok(())
    }

    fn update_event(&self, event: &Event) -> Result<(), StoreError> {
        require(&event.id, "event id")?;
        let mut events = self.events();
        let slot = events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| StoreError::NotFound(event.id.clone()))?;
        *slot = event.clone();
        Ok(())
    }

    fn delete_event(&self, id: &str) -> Result<(), StoreError> {
        require(id, "event id")?;
        let mut events = self.events();
        let pos = events
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        events.remove(pos);
        Ok(())
    }

    fn list_events_by_creator(&self, creator_id: &str) -> Result<Vec<Event>, StoreError> {
        require(creator_id, "creator id")?;
        let mut events: Vec<Event> = self
            .events()
            .iter()
            .filter(|e| e.creator_id.as_deref() == Some(creator_id))
            .cloned()
            .collect();
        filter::sort_by_date(&mut events);
        Ok(events)
    }
}

impl UserRepository for MemoryStore {
    fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        require(id, "user id")?;
        Ok(self
            .users()
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone()))
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        require(email, "email")?;
        let wanted = email.trim().to_lowercase();
        Ok(self
            .users()
            .iter()
            .find(|(u, _)| u.email.to_lowercase() == wanted)
            .map(|(u, _)| u.clone()))
    }

    fn insert_user(&self, user: &User, credentials: &Credentials) -> Result<(), StoreError> {
        require(&user.id, "user id")?;
        require(&user.email, "email")?;
        let mut users = self.users();
        let email = user.email.to_lowercase();
        if users
            .iter()
            .any(|(u, _)| u.id == user.id || u.email.to_lowercase() == email)
        {
            return Err(StoreError::Conflict(user.email.clone()));
        }
        users.push((user.clone(), credentials.clone()));
        Ok(())
    }

    fn update_user(&self, user: &User) -> Result<(), StoreError> {
        require(&user.id, "user id")?;
        let mut users = self.users();
        let slot = users
            .iter_mut()
            .find(|(u, _)| u.id == user.id)
            .ok_or_else(|| StoreError::NotFound(user.id.clone()))?;
        slot.0 = user.clone();
        Ok(())
    }

    fn get_credentials(&self, user_id: &str) -> Result<Option<Credentials>, StoreError> {
        require(user_id, "user id")?;
        Ok(self
            .users()
            .iter()
            .find(|(u, _)| u.id == user_id)
            .map(|(_, c)| c.clone()))
    }

    fn put_credentials(&self, user_id: &str, credentials: &Credentials) -> Result<(), StoreError> {
        require(user_id, "user id")?;
        let mut users = self.users();
        let slot = users
            .iter_mut()
            .find(|(u, _)| u.id == user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        slot.1 = credentials.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::EventDate;
    use crate::models::Role;

    fn stores() -> Vec<Box<dyn EventRepository>> {
        vec![
            Box::new(Store::open_in_memory().unwrap()),
            Box::new(MemoryStore::new()),
        ]
    }

    fn sample(id: &str, title: &str, date: &str) -> Event {
        let mut event = seed::default_events().remove(0);
        event.id = id.to_string();
        event.title = title.to_string();
        event.date = EventDate::parse(date).ok();
        event
    }

    #[test]
    fn unknown_stored_category_does_not_break_listing() {
        let store = Store::open_in_memory().unwrap();
        store.insert_event(&sample("known", "Known", "2025-06-01")).unwrap();

        let mut payload = serde_json::to_value(sample("odd", "Odd", "2025-07-01")).unwrap();
        payload["event_type"] = serde_json::json!("Fun Run");
        store
            .conn()
            .execute(
                "INSERT INTO events (id, title, date, creator_id, payload, created_at_utc, updated_at_utc)
                 VALUES ('odd', 'Odd', '2025-07-01', NULL, ?1, '2025-01-01T00:00:00Z', '2025-01-01T00:00:00Z')",
                params![payload.to_string()],
            )
            .unwrap();

        let events = store.list_events().unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["known", "odd"]);
        assert_eq!(events[1].event_type, None);
        assert_eq!(events[1].category_label(), "Uncategorized");
    }

    #[test]
    fn lists_by_date_then_title() {
        for store in stores() {
            store.insert_event(&sample("c", "Later", "2025-09-01")).unwrap();
            store.insert_event(&sample("b", "Beta", "2025-06-01")).unwrap();
            store.insert_event(&sample("a", "Alpha", "2025-06-01")).unwrap();
            store.insert_event(&sample("u", "Undated", "soon")).unwrap();
            let ids: Vec<_> = store
                .list_events()
                .unwrap()
                .into_iter()
                .map(|e| e.id)
                .collect();
            assert_eq!(ids, vec!["a", "b", "c", "u"]);
        }
    }

    #[test]
    fn update_overwrites_and_delete_removes() {
        for store in stores() {
            let mut event = sample("x", "Original", "2025-06-01");
            store.insert_event(&event).unwrap();
            assert!(matches!(
                store.insert_event(&event),
                Err(StoreError::Conflict(_))
            ));

            event.title = "Renamed".into();
            store.update_event(&event).unwrap();
            assert_eq!(store.get_event("x").unwrap().unwrap().title, "Renamed");

            store.delete_event("x").unwrap();
            assert!(store.get_event("x").unwrap().is_none());
            assert!(matches!(
                store.delete_event("x"),
                Err(StoreError::NotFound(_))
            ));
            assert!(matches!(
                store.update_event(&event),
                Err(StoreError::NotFound(_))
            ));
        }
    }

    #[test]
    fn rejects_empty_ids_before_querying() {
        for store in stores() {
            assert!(matches!(
                store.get_event("  "),
                Err(StoreError::InvalidArgument("event id"))
            ));
            assert!(matches!(
                store.delete_event(""),
                Err(StoreError::InvalidArgument(_))
            ));
            assert!(matches!(
                store.list_events_by_creator(""),
                Err(StoreError::InvalidArgument("creator id"))
            ));
        }
    }

    #[test]
    fn filters_by_creator() {
        for store in stores() {
            let mut mine = sample("m", "Mine", "2025-06-01");
            mine.creator_id = Some("user-1".into());
            store.insert_event(&mine).unwrap();
            store.insert_event(&sample("o", "Other", "2025-06-01")).unwrap();
            let found = store.list_events_by_creator("user-1").unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, "m");
        }
    }

    #[test]
    fn sqlite_store_persists_and_seeds_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.sqlite");
        {
            let store = Store::open(&path).unwrap();
            assert_eq!(store.seed_if_empty().unwrap(), seed::default_events().len());
            assert_eq!(store.seed_if_empty().unwrap(), 0);
        }
        let reopened = Store::open(&path).unwrap();
        let events = reopened.list_events().unwrap();
        assert_eq!(events.len(), seed::default_events().len());
        assert!(events.windows(2).all(|w| w[0].date <= w[1].date));
    }

    #[test]
    fn users_are_unique_by_email() {
        let user = User {
            id: "u1".into(),
            email: "Ana@Example.com".into(),
            display_name: "Ana".into(),
            phone: None,
            role: Role::Runner,
            created_at: Utc::now(),
        };
        let creds = Credentials {
            salt: "s".into(),
            digest: "d".into(),
            confirmed: false,
            confirmation_token: Some("t".into()),
            reset_token: None,
        };
        let sqlite = Store::open_in_memory().unwrap();
        let memory = MemoryStore::new();
        let repos: [&dyn UserRepository; 2] = [&sqlite, &memory];
        for repo in repos {
            repo.insert_user(&user, &creds).unwrap();
            let mut twin = user.clone();
            twin.id = "u2".into();
            twin.email = "ana@example.com".into();
            assert!(matches!(
                repo.insert_user(&twin, &creds),
                Err(StoreError::Conflict(_))
            ));
            assert_eq!(
                repo.get_user_by_email("ANA@example.com").unwrap().unwrap().id,
                "u1"
            );
            let mut confirmed = creds.clone();
            confirmed.confirmed = true;
            repo.put_credentials("u1", &confirmed).unwrap();
            assert!(repo.get_credentials("u1").unwrap().unwrap().confirmed);
        }
    }
}
