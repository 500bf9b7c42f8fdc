use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::scheduler::Cadence;

pub const DEFAULT_SCHEDULE: &str = "0 0 2 * * *";
pub const DEFAULT_USER_AGENT: &str = "StudentProgressSystem/1.0";
pub const DEFAULT_BASE_URL: &str = "https://codeforces.com/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub codeforces: CodeforcesConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeforcesConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for CodeforcesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    pub path: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            path: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub expression: String,
    #[serde(default)]
    pub cadence: Cadence,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            expression: DEFAULT_SCHEDULE.to_string(),
            cadence: Cadence::Daily,
        }
    }
}

/// SMTP settings. Everything is optional here; the mailer reports what is
/// missing when it is asked to send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Base URL of the student-facing site, used for profile links.
    pub frontend_url: Option<String>,
}

impl TrackerConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: TrackerConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Environment values win over the file so secrets can stay out of it.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("CODEFORCES_BASE_URL") {
            self.codeforces.base_url = v;
        }
        if let Some(v) = var("CODEFORCES_USER_AGENT") {
            self.codeforces.user_agent = v;
        }
        if let Some(v) = var("TRACKER_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = var("EMAIL_HOST") {
            self.mail.host = Some(v);
        }
        if let Some(v) = var("EMAIL_PORT") {
            let port = v
                .parse::<u16>()
                .with_context(|| format!("EMAIL_PORT is not a port number: {}", v))?;
            self.mail.port = Some(port);
        }
        if let Some(v) = var("EMAIL_SECURE") {
            self.mail.secure = v == "true";
        }
        if let Some(v) = var("EMAIL_USER") {
            self.mail.username = Some(v);
        }
        if let Some(v) = var("EMAIL_PASS") {
            self.mail.password = Some(v);
        }
        if let Some(v) = var("EMAIL_FROM") {
            self.mail.from = Some(v);
        }
        if let Some(v) = var("FRONTEND_URL") {
            self.profile.frontend_url = Some(v);
        }

        Ok(())
    }
}

pub fn create_config_template() -> Result<()> {
    let config = TrackerConfig {
        codeforces: CodeforcesConfig::default(),
        database: DatabaseConfig {
            path: "cf_tracker.db".to_string(),
        },
        logs: LogsConfig::default(),
        schedule: ScheduleConfig::default(),
        mail: MailConfig {
            host: Some("smtp.example.com".to_string()),
            port: Some(587),
            secure: false,
            username: Some("coach@example.com".to_string()),
            password: Some("your-app-password-here".to_string()),
            from: Some("Code Coach <coach@example.com>".to_string()),
        },
        profile: ProfileConfig {
            frontend_url: Some("https://coach.example.com".to_string()),
        },
    };

    let json = serde_json::to_string_pretty(&config)?;
    fs::write("config.json", json)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal() -> TrackerConfig {
        serde_json::from_str(r#"{"database": {"path": "test.db"}}"#).unwrap()
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let config = minimal();

        assert_eq!(config.codeforces.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.codeforces.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.schedule.expression, DEFAULT_SCHEDULE);
        assert_eq!(config.schedule.cadence, Cadence::Daily);
        assert!(config.mail.host.is_none());
        assert!(!config.mail.secure);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("CODEFORCES_USER_AGENT", "Coach/2.0"),
            ("EMAIL_HOST", "smtp.test"),
            ("EMAIL_PORT", "465"),
            ("EMAIL_SECURE", "true"),
            ("EMAIL_USER", "bot@test"),
            ("EMAIL_PASS", "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut config = minimal();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.codeforces.user_agent, "Coach/2.0");
        assert_eq!(config.mail.host.as_deref(), Some("smtp.test"));
        assert_eq!(config.mail.port, Some(465));
        assert!(config.mail.secure);
        assert_eq!(config.mail.username.as_deref(), Some("bot@test"));
        assert!(config.mail.from.is_none());
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = minimal();
        let result = config.apply_env(|key| (key == "EMAIL_PORT").then(|| "smtp".to_string()));

        assert!(result.is_err());
    }
}
