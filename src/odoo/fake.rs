use crate::odoo::client::{CatalogApi, CatalogError, Model};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Search { model: Model, name: String },
    Create { model: Model, payload: Value },
    Write { model: Model, ids: Vec<i64>, payload: Value },
    Archive { model: Model, ids: Vec<i64> },
}

/// Scripted catalog: searches answer from a fixed table, creates hand out
/// increasing ids, every call is recorded.
pub struct RecordingCatalog {
    matches: HashMap<(Model, String), Vec<i64>>,
    failures: HashMap<(Model, &'static str), u16>,
    next_id: AtomicI64,
    calls: Mutex<Vec<Call>>,
}

impl Default for RecordingCatalog {
    fn default() -> Self {
        Self {
            matches: HashMap::new(),
            failures: HashMap::new(),
            next_id: AtomicI64::new(1000),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingCatalog {
    pub fn with_match(mut self, model: Model, name: &str, ids: &[i64]) -> Self {
        self.matches.insert((model, name.to_string()), ids.to_vec());
        self
    }

    pub fn failing(mut self, model: Model, method: &'static str, status: u16) -> Self {
        self.failures.insert((model, method), status);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_on(&self, model: Model) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::Search { model: m, .. }
                | Call::Create { model: m, .. }
                | Call::Write { model: m, .. }
                | Call::Archive { model: m, .. } => *m == model,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn check(&self, model: Model, method: &'static str) -> Result<(), CatalogError> {
        match self.failures.get(&(model, method)) {
            Some(status) => Err(CatalogError::Status {
                status: *status,
                url: format!("http://catalog.test/{}/{method}", model.as_str()),
                body: "scripted failure".into(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CatalogApi for RecordingCatalog {
    async fn search(&self, model: Model, name: &str) -> Result<Vec<i64>, CatalogError> {
        self.record(Call::Search {
            model,
            name: name.to_string(),
        });
        self.check(model, "search")?;
        Ok(self
            .matches
            .get(&(model, name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, model: Model, payload: &Value) -> Result<i64, CatalogError> {
        self.record(Call::Create {
            model,
            payload: payload.clone(),
        });
        self.check(model, "create")?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write(&self, model: Model, ids: &[i64], payload: &Value) -> Result<(), CatalogError> {
        self.record(Call::Write {
            model,
            ids: ids.to_vec(),
            payload: payload.clone(),
        });
        self.check(model, "write")
    }

    async fn archive(&self, model: Model, ids: &[i64]) -> Result<(), CatalogError> {
        self.record(Call::Archive {
            model,
            ids: ids.to_vec(),
        });
        self.check(model, "archive")
    }
}
