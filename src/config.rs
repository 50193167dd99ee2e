use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_TAX_NAME: &str = "0% EXEMPT G";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_MARKETPLACE_URL: &str = "https://www.leboncoin.fr";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable '{0}' not found")]
    Missing(&'static str),
}

/// Settings resolved once at startup. Every required value must be present
/// before any scraping or publishing starts.
#[derive(Debug, Clone)]
pub struct Settings {
    pub odoo_api_key: String,
    pub odoo_url: String,
    pub odoo_database: String,
    pub odoo_username: String,
    pub leboncoin_identifier: String,
    pub tax_name: String,
    pub webdriver_url: String,
    pub marketplace_url: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let optional = |key: &str, default: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            odoo_api_key: required("ODOO_API_KEY")?,
            odoo_url: required("ODOO_URL")?.trim_end_matches('/').to_string(),
            odoo_database: required("ODOO_DATABASE")?,
            odoo_username: required("ODOO_USERNAME")?,
            leboncoin_identifier: required("LEBONCOIN_IDENTIFIER")?,
            tax_name: optional("ODOO_TAX_NAME", DEFAULT_TAX_NAME),
            webdriver_url: optional("WEBDRIVER_URL", DEFAULT_WEBDRIVER_URL)
                .trim_end_matches('/')
                .to_string(),
            marketplace_url: optional("LBC_BASE_URL", DEFAULT_MARKETPLACE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Snapshot file for the scraped profile, `{identifier}.json`.
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.json", self.leboncoin_identifier))
    }
}
