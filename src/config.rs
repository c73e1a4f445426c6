//! Layered configuration for studyboard.
//!
//! Values come from `studyboard.toml` (every field optional), then
//! environment variables, then command-line flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3150
//! dev_mode = false
//!
//! [database]
//! path = ".studyboard/studyboard.db"
//!
//! [auth]
//! session_ttl_hours = 720
//! verification_ttl_minutes = 15
//!
//! [calendar]
//! due_soon_days = 3
//! upcoming_days = 7
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::progress::UrgencyThresholds;

pub const DEFAULT_CONFIG_FILE: &str = "studyboard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Permissive CORS, and sign-in tokens echoed in responses.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3150,
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".studyboard/studyboard.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub session_ttl_hours: i64,
    pub verification_ttl_minutes: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24 * 30,
            verification_ttl_minutes: 15,
        }
    }
}

impl AuthSection {
    /// Upper bound for both lifetimes, keeping `now + ttl` well inside
    /// chrono's range.
    pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session_ttl_hours)
    }

    pub fn verification_ttl(&self) -> Duration {
        Duration::minutes(self.verification_ttl_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSection {
    pub due_soon_days: i64,
    pub upcoming_days: i64,
}

impl Default for CalendarSection {
    fn default() -> Self {
        let t = UrgencyThresholds::default();
        Self {
            due_soon_days: t.due_soon_days,
            upcoming_days: t.upcoming_days,
        }
    }
}

impl CalendarSection {
    pub fn thresholds(&self) -> UrgencyThresholds {
        UrgencyThresholds {
            due_soon_days: self.due_soon_days,
            upcoming_days: self.upcoming_days,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyboardToml {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub calendar: CalendarSection,
}

impl StudyboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse studyboard.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        let max_hours = AuthSection::MAX_TTL_HOURS;
        if !(1..=max_hours).contains(&self.auth.session_ttl_hours) {
            anyhow::bail!("auth.session_ttl_hours must be between 1 and {}", max_hours);
        }
        if !(1..=max_hours * 60).contains(&self.auth.verification_ttl_minutes) {
            anyhow::bail!(
                "auth.verification_ttl_minutes must be between 1 and {}",
                max_hours * 60
            );
        }
        if self.calendar.due_soon_days > self.calendar.upcoming_days {
            anyhow::bail!("calendar.due_soon_days must not exceed calendar.upcoming_days");
        }
        Ok(())
    }

    /// Apply `STUDYBOARD_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = get("STUDYBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("STUDYBOARD_PORT") {
            self.server.port = port.parse().context("Failed to parse STUDYBOARD_PORT")?;
        }
        if let Some(path) = get("STUDYBOARD_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dev) = get("STUDYBOARD_DEV") {
            self.server.dev_mode = matches!(dev.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = StudyboardToml::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, StudyboardToml::default());
        assert_eq!(config.server.port, 3150);
        assert_eq!(config.calendar.thresholds(), UrgencyThresholds::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = StudyboardToml::parse(
            r#"
            [server]
            port = 9000

            [calendar]
            due_soon_days = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.calendar.due_soon_days, 1);
        assert_eq!(config.calendar.upcoming_days, 7);
        assert_eq!(config.auth.verification_ttl_minutes, 15);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[database]\npath = \"/tmp/board.db\"\n").unwrap();
        let config = StudyboardToml::load(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/board.db"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = StudyboardToml::parse("[calendar]\ndue_soon_days = 9\nupcoming_days = 2\n")
            .unwrap_err();
        assert!(err.to_string().contains("due_soon_days"));
    }

    #[test]
    fn test_rejects_out_of_range_ttls() {
        let err = StudyboardToml::parse("[auth]\nsession_ttl_hours = 9223372036854775807\n")
            .unwrap_err();
        assert!(err.to_string().contains("session_ttl_hours"));

        let err = StudyboardToml::parse("[auth]\nverification_ttl_minutes = 99999999999\n")
            .unwrap_err();
        assert!(err.to_string().contains("verification_ttl_minutes"));

        let err = StudyboardToml::parse("[auth]\nsession_ttl_hours = 0\n").unwrap_err();
        assert!(err.to_string().contains("session_ttl_hours"));
    }

    #[test]
    fn test_largest_ttls_are_usable() {
        let config = StudyboardToml::parse(&format!(
            "[auth]\nsession_ttl_hours = {}\nverification_ttl_minutes = {}\n",
            AuthSection::MAX_TTL_HOURS,
            AuthSection::MAX_TTL_HOURS * 60
        ))
        .unwrap();
        let now = chrono::Utc::now();
        assert!(now + config.auth.session_ttl() > now);
        assert_eq!(config.auth.session_ttl(), config.auth.verification_ttl());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STUDYBOARD_PORT", "4000"),
            ("STUDYBOARD_DB_PATH", "/data/sb.db"),
            ("STUDYBOARD_DEV", "true"),
        ]
        .into_iter()
        .collect();
        let mut config = StudyboardToml::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.path, PathBuf::from("/data/sb.db"));
        assert!(config.server.dev_mode);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_env_rejects_bad_port() {
        let mut config = StudyboardToml::default();
        let err = config
            .apply_vars(|k| (k == "STUDYBOARD_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("STUDYBOARD_PORT"));
    }
}
