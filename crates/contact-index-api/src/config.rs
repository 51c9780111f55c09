use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DB_PATH_ENV: &str = "CONTACT_INDEX_DB";
pub const CARDS_DIR_ENV: &str = "CONTACT_INDEX_CARDS_DIR";

pub const DEFAULT_DB_PATH: &str = "./contact_index.sqlite3";
pub const DEFAULT_CARDS_DIR: &str = "./cards";

/// Where the index database and the card store live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactIndexConfig {
    pub db_path: PathBuf,
    pub cards_dir: PathBuf,
}

impl Default for ContactIndexConfig {
    fn default() -> Self {
        Self { db_path: PathBuf::from(DEFAULT_DB_PATH), cards_dir: PathBuf::from(DEFAULT_CARDS_DIR) }
    }
}

impl ContactIndexConfig {
    /// Defaults overlaid with `CONTACT_INDEX_DB` and `CONTACT_INDEX_CARDS_DIR`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_lookup(|var| std::env::var(var).ok())
    }

    fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(db_path) = env_path(lookup(DB_PATH_ENV)) {
            self.db_path = db_path;
        }
        if let Some(cards_dir) = env_path(lookup(CARDS_DIR_ENV)) {
            self.cards_dir = cards_dir;
        }
        self
    }

    /// Apply explicit overrides, typically from command line flags.
    #[must_use]
    pub fn with_overrides(mut self, db_path: Option<PathBuf>, cards_dir: Option<PathBuf>) -> Self {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }
        if let Some(cards_dir) = cards_dir {
            self.cards_dir = cards_dir;
        }
        self
    }
}

fn env_path(value: Option<String>) -> Option<PathBuf> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_working_directory() {
        let config = ContactIndexConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./contact_index.sqlite3"));
        assert_eq!(config.cards_dir, PathBuf::from("./cards"));
    }

    #[test]
    fn environment_overrides_defaults_and_blank_values_are_ignored() {
        let config = ContactIndexConfig::default().with_env_lookup(|var| match var {
            DB_PATH_ENV => Some(" /tmp/index.sqlite3 ".to_string()),
            CARDS_DIR_ENV => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.db_path, PathBuf::from("/tmp/index.sqlite3"));
        assert_eq!(config.cards_dir, PathBuf::from(DEFAULT_CARDS_DIR));
    }

    #[test]
    fn explicit_overrides_win() {
        let config = ContactIndexConfig::default()
            .with_env_lookup(|_| Some("/from/env".to_string()))
            .with_overrides(None, Some(PathBuf::from("/from/flag")));
        assert_eq!(config.db_path, PathBuf::from("/from/env"));
        assert_eq!(config.cards_dir, PathBuf::from("/from/flag"));
    }
}
