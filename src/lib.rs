pub mod auth;
pub mod config;
pub mod dates;
pub mod db;
pub mod filter;
pub mod geocoding;
pub mod markers;
pub mod models;
pub mod seed;
pub mod service;
pub mod settings;
mod utils;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::AuthService;
use config::ConfigStore;
use db::Store;
use geocoding::{Geocoder, GeoError, ReqwestClient};
use service::EventService;
use settings::Settings;

pub use dates::EventDate;
pub use filter::FilterCriteria;
pub use models::{Coordinates, Distance, Event, EventType, NewEvent, Price, User};

pub const LOG_ENV: &str = "RUST_LOG";
const DEFAULT_LOG_DIRECTIVE: &str = "race_events=info";

fn log_filter(directives: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(
        DEFAULT_LOG_DIRECTIVE
            .parse()
            .unwrap_or_else(|_| tracing::level_filters::LevelFilter::INFO.into()),
    );
    builder.parse_lossy(directives.map(str::trim).unwrap_or_default())
}

/// Stderr logging filtered by `RUST_LOG` (falls back to
/// `race_events=info`). Safe to call more than once.
pub fn init_tracing() {
    let directives = std::env::var(LOG_ENV).ok();
    let _ = tracing_subscriber::registry()
        .with(log_filter(directives.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] db::StoreError),
    #[error(transparent)]
    Geo(#[from] GeoError),
}

/// Everything a front end needs, wired from [`Settings`].
pub struct App {
    pub settings: Settings,
    pub events: EventService,
    pub auth: AuthService,
    pub geocoder: Geocoder,
    pub config: Arc<ConfigStore>,
}

impl App {
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let store = Arc::new(Store::open(&settings.database_path)?);
        store.seed_if_empty()?;
        let client = Arc::new(ReqwestClient::new(&settings.user_agent)?);
        let geocoder = Geocoder::new(&settings.geocoder_url, client);
        let config = Arc::new(ConfigStore::load_from(&settings.config_path));
        if settings.dev_tools {
            tracing::info!(db = ?settings.database_path, "developer tools enabled");
        }

        Ok(Self {
            events: EventService::new(store.clone()),
            auth: AuthService::new(store),
            geocoder,
            config,
            settings,
        })
    }

    pub fn today(&self) -> chrono::NaiveDate {
        dates::today_in(self.settings.timezone)
    }
}
