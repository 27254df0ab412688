use std::env;
use std::fs;
use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CheckinError, Result};
use crate::preferences::DEFAULT_TIMEZONE;

pub const DEFAULT_WHATSAPP_API_URL: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub poll_seconds: Option<u64>,
    pub default_timezone: Option<String>,
    pub trend_days: Option<u32>,
    pub randomize_seed: Option<u64>,
    /// Days of notification history kept before the daily cleanup drops them.
    pub history_retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhatsAppConfig {
    pub api_url: Option<String>,
    pub phone_number_id: Option<String>,
    pub access_token: Option<String>,
    pub verify_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifierConfig {
    pub sibling_url: Option<String>,
    pub token: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub scheduler: Option<SchedulerConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub notifier: Option<NotifierConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| CheckinError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| CheckinError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_store(db_path: &str) -> Result<Self> {
        crate::config_store::load_config(db_path)
    }

    /// Secrets from the environment win over stored values.
    pub fn resolve_env(mut self) -> Self {
        if let Some(token) = env_secret("CHECKIN_WHATSAPP_TOKEN") {
            self.whatsapp.get_or_insert_with(Default::default).access_token = Some(token);
        }
        if let Some(token) = env_secret("CHECKIN_WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.get_or_insert_with(Default::default).verify_token = Some(token);
        }
        if let Some(id) = env_secret("CHECKIN_WHATSAPP_PHONE_NUMBER_ID") {
            self.whatsapp.get_or_insert_with(Default::default).phone_number_id = Some(id);
        }
        if let Some(url) = env_secret("CHECKIN_SIBLING_URL") {
            self.notifier.get_or_insert_with(Default::default).sibling_url = Some(url);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let tz = self.default_timezone_name();
        if tz.parse::<Tz>().is_err() {
            return Err(CheckinError::Config(format!("unknown timezone '{tz}'")));
        }
        if self.poll_seconds() == 0 {
            return Err(CheckinError::Config(
                "scheduler.poll_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_seconds(&self) -> u64 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.poll_seconds)
            .unwrap_or(60)
    }

    pub fn default_timezone_name(&self) -> String {
        self.scheduler
            .as_ref()
            .and_then(|s| s.default_timezone.clone())
            .filter(|tz| !tz.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string())
    }

    pub fn default_timezone(&self) -> Tz {
        self.default_timezone_name()
            .parse()
            .unwrap_or(chrono_tz::Europe::Paris)
    }

    pub fn trend_days(&self) -> u32 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.trend_days)
            .unwrap_or(7)
            .max(1)
    }

    pub fn history_retention_days(&self) -> u32 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.history_retention_days)
            .unwrap_or(7)
            .max(1)
    }

    pub fn randomize_seed(&self) -> Option<u64> {
        self.scheduler.as_ref().and_then(|s| s.randomize_seed)
    }

    pub fn whatsapp_api_url(&self) -> String {
        self.whatsapp
            .as_ref()
            .and_then(|w| w.api_url.clone())
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WHATSAPP_API_URL.to_string())
    }

    pub fn verify_token(&self) -> Option<String> {
        self.whatsapp
            .as_ref()
            .and_then(|w| w.verify_token.clone())
            .filter(|token| !token.trim().is_empty())
    }

    /// `(phone_number_id, access_token)` when both are set.
    pub fn whatsapp_credentials(&self) -> Option<(String, String)> {
        let whatsapp = self.whatsapp.as_ref()?;
        let id = whatsapp.phone_number_id.clone().filter(|v| !v.trim().is_empty())?;
        let token = whatsapp.access_token.clone().filter(|v| !v.trim().is_empty())?;
        Some((id, token))
    }

    pub fn notifier_token(&self) -> Option<String> {
        self.notifier.as_ref().and_then(|n| n.token.clone())
    }

    pub fn notifier_timeout_seconds(&self) -> u64 {
        self.notifier
            .as_ref()
            .and_then(|n| n.timeout_seconds)
            .unwrap_or(5)
            .max(1)
    }

    pub fn sibling_url(&self) -> Option<String> {
        self.notifier
            .as_ref()
            .and_then(|n| n.sibling_url.clone())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }
}

pub fn default_config() -> Config {
    Config {
        scheduler: Some(SchedulerConfig {
            poll_seconds: Some(60),
            default_timezone: Some(DEFAULT_TIMEZONE.to_string()),
            trend_days: Some(7),
            randomize_seed: None,
            history_retention_days: Some(7),
        }),
        whatsapp: Some(WhatsAppConfig {
            api_url: Some(DEFAULT_WHATSAPP_API_URL.to_string()),
            phone_number_id: None,
            access_token: None,
            verify_token: None,
        }),
        notifier: None,
    }
}

fn env_secret(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config = Config::default();
        assert_eq!(config.poll_seconds(), 60);
        assert_eq!(config.default_timezone(), chrono_tz::Europe::Paris);
        assert_eq!(config.trend_days(), 7);
        assert_eq!(config.history_retention_days(), 7);
        assert_eq!(config.whatsapp_api_url(), DEFAULT_WHATSAPP_API_URL);
        assert!(config.sibling_url().is_none());
        assert!(config.whatsapp_credentials().is_none());
        assert_eq!(config.notifier_timeout_seconds(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let config = Config {
            scheduler: Some(SchedulerConfig {
                default_timezone: Some("Atlantis/Capital".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
