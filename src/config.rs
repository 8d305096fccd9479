//! Process-wide configuration (spec §6, §9.1): loaded from a TOML file with
//! sane defaults, overridable by CLI flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::WotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Minor,
    Normal,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Minor => "minor",
            LogLevel::Normal => "normal",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: String,
    pub full_verification_interval_days: u64,
    pub defrag_interval_days: u64,
    pub min_hint_source_capacity: u32,
    pub max_concurrent_slow_fetches: usize,
    pub log_level: LogLevel,
    /// Selects the pre-incremental score algorithm for A/B validation (spec §6).
    pub use_legacy_reference_implementation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: "./wotd-data".to_string(),
            full_verification_interval_days: 28,
            defrag_interval_days: 7,
            min_hint_source_capacity: crate::model::edition_hint::DEFAULT_MIN_SOURCE_CAPACITY,
            max_concurrent_slow_fetches: 4,
            log_level: LogLevel::Normal,
            use_legacy_reference_implementation: false,
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults for any field the file
    /// omits. Missing file is not an error (grounds a fresh node).
    pub fn load(path: &Path) -> Result<Self, WotError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| WotError::Unavailable(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| WotError::InvalidParameter(format!("parsing {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), WotError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WotError::Unavailable(format!("creating {}: {e}", parent.display())))?;
        }
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| WotError::Unavailable(format!("serializing config: {e}")))?;
        fs::write(path, rendered)
            .map_err(|e| WotError::Unavailable(format!("writing {}: {e}", path.display())))
    }

    pub fn effective_min_hint_source_capacity(&self) -> u32 {
        if self.use_legacy_reference_implementation {
            crate::model::edition_hint::LEGACY_MIN_SOURCE_CAPACITY
        } else {
            self.min_hint_source_capacity
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/wotd.toml")).unwrap();
        assert_eq!(cfg.full_verification_interval_days, 28);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wotd.toml");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "data_dir = \"/tmp/wot\"\nlog_level = \"debug\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.data_dir, "/tmp/wot");
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.max_concurrent_slow_fetches, 4);
    }

    #[test]
    fn legacy_flag_relaxes_min_capacity() {
        let mut cfg = Config::default();
        assert_eq!(cfg.effective_min_hint_source_capacity(), 1);
        cfg.use_legacy_reference_implementation = true;
        assert_eq!(cfg.effective_min_hint_source_capacity(), 0);
    }
}
