//! Persisted user preferences
//!
//! Theme, gamification display mode and the gamification counter survive
//! restarts through a small key-value store. Reads never fail: a missing or
//! unreadable entry falls back to its default.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::models::Progress;

pub const THEME_KEY: &str = "theme";
pub const MODE_KEY: &str = "gamificationMode";
pub const PROGRESS_KEY: &str = "gamificationProgress";

/// Preference store errors
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-value store holding user preferences
pub trait PreferenceStore: Send + Sync {
    /// Returns the stored value, if any
    fn get(&self, key: &str) -> Option<String>;

    /// Stores a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError>;
}

/// A store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A store backed by a JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing or corrupt file starts out empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(&*entries)?)?;
        Ok(())
    }
}

/// Visual theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Forest,
    Paper,
    Neo,
    Fun,
}

impl Theme {
    pub const ALL: [Theme; 6] = [
        Theme::Light,
        Theme::Dark,
        Theme::Forest,
        Theme::Paper,
        Theme::Neo,
        Theme::Fun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::Forest => "forest",
            Theme::Paper => "paper",
            Theme::Neo => "neo",
            Theme::Fun => "fun",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|theme| theme.as_str() == value)
    }

    /// The dark mode switch: dark goes to light, everything else goes to dark
    pub fn toggled(self) -> Self {
        if self == Theme::Dark {
            Theme::Light
        } else {
            Theme::Dark
        }
    }
}

/// How gamification progress is visualised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamificationMode {
    #[default]
    Forest,
    Build,
    Companion,
    Streak,
}

impl GamificationMode {
    pub const ALL: [GamificationMode; 4] = [
        GamificationMode::Forest,
        GamificationMode::Build,
        GamificationMode::Companion,
        GamificationMode::Streak,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GamificationMode::Forest => "forest",
            GamificationMode::Build => "build",
            GamificationMode::Companion => "companion",
            GamificationMode::Streak => "streak",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == value)
    }

    /// Human readable name of the mode
    pub fn label(self) -> &'static str {
        match self {
            GamificationMode::Forest => "Growing Forest",
            GamificationMode::Build => "Build World",
            GamificationMode::Companion => "Companion",
            GamificationMode::Streak => "Streak Meter",
        }
    }
}

/// Display preferences of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: Theme,
    pub gamification_mode: GamificationMode,
}

impl Preferences {
    /// Reads display preferences, defaulting anything missing or invalid
    pub fn load(store: &dyn PreferenceStore) -> Self {
        Self {
            theme: store
                .get(THEME_KEY)
                .and_then(|value| Theme::parse(&value))
                .unwrap_or_default(),
            gamification_mode: store
                .get(MODE_KEY)
                .and_then(|value| GamificationMode::parse(&value))
                .unwrap_or_default(),
        }
    }
}

/// Reads the persisted gamification counter, defaulting to zero
pub fn load_progress(store: &dyn PreferenceStore) -> Progress {
    store
        .get(PROGRESS_KEY)
        .and_then(|value| value.trim().parse::<u8>().ok())
        .map(Progress::new)
        .unwrap_or_default()
}
