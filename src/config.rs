use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

pub mod settings;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_key_id: String,
    pub gateway_key_secret: String,
    pub gateway_webhook_secret: String,
    pub gateway_cb_failures: u32,
    pub gateway_cb_reset_secs: u64,
    pub admin_api_key: String,
    pub default_currency: String,
    pub cors_allowed_origins: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow::anyhow!("{} must be set", key))
        };

        let default_currency = lookup("DEFAULT_CURRENCY")
            .unwrap_or_else(|| "INR".to_string())
            .to_uppercase();
        if default_currency.len() != 3 || !default_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            anyhow::bail!("DEFAULT_CURRENCY must be a three-letter ISO code");
        }

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("text") | None => LogFormat::Text,
            Some(other) => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        };

        Ok(Config {
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()?,
            database_url: required("DATABASE_URL")?,
            gateway_base_url: required("GATEWAY_BASE_URL")?,
            gateway_key_id: required("GATEWAY_KEY_ID")?,
            gateway_key_secret: required("GATEWAY_KEY_SECRET")?,
            gateway_webhook_secret: required("GATEWAY_WEBHOOK_SECRET")?,
            gateway_cb_failures: lookup("GATEWAY_CB_FAILURES")
                .unwrap_or_else(|| "3".to_string())
                .parse()?,
            gateway_cb_reset_secs: lookup("GATEWAY_CB_RESET_SECS")
                .unwrap_or_else(|| "60".to_string())
                .parse()?,
            admin_api_key: required("ADMIN_API_KEY")?,
            default_currency,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS").filter(|v| !v.trim().is_empty()),
            notify_webhook_url: lookup("NOTIFY_WEBHOOK_URL").filter(|v| !v.trim().is_empty()),
            log_format,
        })
    }
}
