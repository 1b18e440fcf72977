use std::path::PathBuf;

use chrono_tz::Tz;

use crate::models::Coordinates;
use crate::utils;

const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
const DEFAULT_USER_AGENT: &str = "race-events/0.1 (https://github.com/race-events/race-events)";
const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;

/// Environment-provided settings. Nothing here is written back.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub dev_tools: bool,
    pub geocoder_url: String,
    pub user_agent: String,
    pub timezone: Tz,
    pub database_path: PathBuf,
    pub config_path: PathBuf,
    pub home_position: Option<Coordinates>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timezone = match get("RACE_EVENTS_TIMEZONE") {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|err| {
                tracing::warn!(timezone = %name, error = %err, "unknown timezone, using default");
                DEFAULT_TIMEZONE
            }),
            None => DEFAULT_TIMEZONE,
        };
        let home_position = get("RACE_EVENTS_HOME").and_then(|raw| {
            let (lat, lon) = raw.split_once(',')?;
            Coordinates::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
        });

        Self {
            backend_url: get("RACE_EVENTS_BACKEND_URL"),
            api_key: get("RACE_EVENTS_API_KEY"),
            dev_tools: get("RACE_EVENTS_DEV_TOOLS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            geocoder_url: get("RACE_EVENTS_GEOCODER_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
            user_agent: get("RACE_EVENTS_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timezone,
            database_path: get("RACE_EVENTS_DB")
                .map(PathBuf::from)
                .unwrap_or_else(utils::database_path),
            config_path: get("RACE_EVENTS_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(utils::config_path),
            home_position,
        }
    }
}
