use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::models::NewEvent;
use crate::utils;

pub const DRAFT_SAVE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config format error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    List,
    Grid,
    Calendar,
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "list" => Ok(ViewMode::List),
            "grid" => Ok(ViewMode::Grid),
            "calendar" => Ok(ViewMode::Calendar),
            other => Err(format!("unknown view: {other}")),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewMode::List => "list",
            ViewMode::Grid => "grid",
            ViewMode::Calendar => "calendar",
        };
        f.write_str(name)
    }
}

/// Locally remembered UI state.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub view_mode: ViewMode,
    pub event_draft: Option<NewEvent>,
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(&utils::config_path())
    }

    /// A missing or unreadable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        let data = read_config(path).unwrap_or_else(|err| {
            tracing::warn!(path = ?path, error = %err, "ignoring unreadable config");
            AppConfig::default()
        });
        Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        self.data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }

    pub fn set_view_mode(&self, mode: ViewMode) -> Result<AppConfig, ConfigError> {
        self.update(|config| config.view_mode = mode)
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    utils::ensure_parent(path);
    let contents = serde_json::to_string_pretty(config)?;
    fs::write(path, contents)?;
    Ok(())
}

enum DraftCommand {
    Edit(NewEvent),
    Flush(oneshot::Sender<()>),
    Discard,
}

/// Saves the add-event draft once the form has been idle for
/// [`DRAFT_SAVE_DELAY`]. Each edit restarts the wait.
pub struct DraftAutosaver {
    tx: mpsc::UnboundedSender<DraftCommand>,
    handle: JoinHandle<()>,
}

impl DraftAutosaver {
    pub fn spawn(store: Arc<ConfigStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_autosaver(store, rx));
        Self { tx, handle }
    }

    pub fn edit(&self, draft: NewEvent) {
        let _ = self.tx.send(DraftCommand::Edit(draft));
    }

    /// Saves a pending draft right away.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(DraftCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drops the pending draft and clears the saved one, e.g. after submit.
    pub async fn discard(&self) {
        let _ = self.tx.send(DraftCommand::Discard);
        self.flush().await;
    }

    pub async fn shutdown(self) {
        self.flush().await;
        drop(self.tx);
        let _ = self.handle.await;
    }
}

async fn run_autosaver(store: Arc<ConfigStore>, mut rx: mpsc::UnboundedReceiver<DraftCommand>) {
    let mut pending: Option<NewEvent> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(DraftCommand::Edit(draft)) => {
                    pending = Some(draft);
                    deadline = Instant::now() + DRAFT_SAVE_DELAY;
                }
                Some(DraftCommand::Flush(done)) => {
                    if let Some(draft) = pending.take() {
                        save_draft(&store, Some(draft));
                    }
                    let _ = done.send(());
                }
                Some(DraftCommand::Discard) => {
                    pending = None;
                    save_draft(&store, None);
                }
                None => break,
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                save_draft(&store, pending.take());
            }
        }
    }
}

fn save_draft(store: &ConfigStore, draft: Option<NewEvent>) {
    if let Err(err) = store.update(|config| config.event_draft = draft) {
        tracing::warn!(error = %err, "failed to save event draft");
    }
}
