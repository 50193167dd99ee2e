use crate::config::Settings;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP error {status} for URL {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl CatalogError {
    /// Rejected credentials affect every listing, not just the current one.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CatalogError::Status { status: 401 | 403, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    ProductTemplate,
    ProductImage,
    ProductCategory,
    PublicCategory,
    ProductTag,
    AccountTax,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::ProductTemplate => "product.template",
            Model::ProductImage => "product.image",
            Model::ProductCategory => "product.category",
            Model::PublicCategory => "product.public.category",
            Model::ProductTag => "product.tag",
            Model::AccountTax => "account.tax",
        }
    }
}

/// The four calls the publisher needs from the downstream catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Ids of records whose name equals `name` exactly.
    async fn search(&self, model: Model, name: &str) -> Result<Vec<i64>, CatalogError>;
    async fn create(&self, model: Model, payload: &Value) -> Result<i64, CatalogError>;
    async fn write(&self, model: Model, ids: &[i64], payload: &Value)
    -> Result<(), CatalogError>;
    async fn archive(&self, model: Model, ids: &[i64]) -> Result<(), CatalogError>;
}

/// `create` answers with a bare id or with a list when called with `vals_list`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CreatedIds {
    One(i64),
    Many(Vec<i64>),
}

#[derive(Debug, Clone)]
pub struct OdooClient {
    base_url: String,
    api_key: String,
    database: String,
    http: Client,
}

impl OdooClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        database: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            database: database.into(),
            http,
        }
    }

    pub fn from_settings(settings: &Settings, http: Client) -> Self {
        Self::new(
            settings.odoo_url.clone(),
            settings.odoo_api_key.clone(),
            settings.odoo_database.clone(),
            http,
        )
    }

    async fn call(&self, model: Model, method: &str, body: &Value) -> Result<Value, CatalogError> {
        let url = format!("{}/{}/{}", self.base_url, model.as_str(), method);
        debug!(target = "lbc.odoo", url = %url, "catalog_call");
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("bearer {}", self.api_key))
            .header("X-Odoo-Database", &self.database)
            .json(body)
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let text = response
            .text()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;

        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url: final_url,
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| CatalogError::InvalidResponse {
            url: final_url,
            message: err.to_string(),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        model: Model,
        method: &str,
        value: Value,
    ) -> Result<T, CatalogError> {
        serde_json::from_value(value).map_err(|err| CatalogError::InvalidResponse {
            url: format!("{}/{}/{}", self.base_url, model.as_str(), method),
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl CatalogApi for OdooClient {
    async fn search(&self, model: Model, name: &str) -> Result<Vec<i64>, CatalogError> {
        let value = self
            .call(model, "search", &json!({ "domain": [["name", "=", name]] }))
            .await?;
        self.decode(model, "search", value)
    }

    async fn create(&self, model: Model, payload: &Value) -> Result<i64, CatalogError> {
        let value = self
            .call(model, "create", &json!({ "vals_list": [payload] }))
            .await?;
        match self.decode::<CreatedIds>(model, "create", value)? {
            CreatedIds::One(id) => Ok(id),
            CreatedIds::Many(ids) => ids.first().copied().ok_or_else(|| {
                CatalogError::InvalidResponse {
                    url: format!("{}/{}/create", self.base_url, model.as_str()),
                    message: "empty id list".into(),
                }
            }),
        }
    }

    async fn write(
        &self,
        model: Model,
        ids: &[i64],
        payload: &Value,
    ) -> Result<(), CatalogError> {
        self.call(model, "write", &json!({ "ids": ids, "vals": payload }))
            .await?;
        Ok(())
    }

    async fn archive(&self, model: Model, ids: &[i64]) -> Result<(), CatalogError> {
        self.call(model, "action_archive", &json!({ "ids": ids, "context": {} }))
            .await?;
        Ok(())
    }
}
