use crate::models::{Listing, ListingRecord};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is not valid json: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("snapshot {0} must contain a json array")]
    NotAnArray(String),
}

pub async fn load(path: &Path) -> Result<Vec<Listing>, StoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_snapshot(&raw, path)
}

/// Like [`load`], but a snapshot that does not exist yet is an empty one.
pub async fn load_or_default(path: &Path) -> Result<Vec<Listing>, StoreError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => load(path).await,
        Ok(false) => {
            info!(target = "lbc.store", path = %path.display(), "snapshot_missing_starting_empty");
            Ok(Vec::new())
        }
        Err(source) => Err(StoreError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Sorts by posting date (descending) and writes the snapshot as indented json.
pub async fn save(path: &Path, listings: &mut [Listing]) -> Result<(), StoreError> {
    let body = render_snapshot(listings).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    tokio::fs::write(path, body)
        .await
        .map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
    info!(target = "lbc.store", path = %path.display(), count = listings.len(), "snapshot_saved");
    Ok(())
}

fn parse_snapshot(raw: &str, path: &Path) -> Result<Vec<Listing>, StoreError> {
    let value: Value = serde_json::from_str(raw).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    let Value::Array(items) = value else {
        return Err(StoreError::NotAnArray(path.display().to_string()));
    };

    let mut listings = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        match item.as_object() {
            Some(record) => listings.push(Listing::from_record(record)),
            None => {
                warn!(target = "lbc.store", position, "snapshot_entry_not_an_object_skipped");
            }
        }
    }
    Ok(listings)
}

fn render_snapshot(listings: &mut [Listing]) -> Result<String, serde_json::Error> {
    listings.sort_by(|a, b| b.date_posted.cmp(&a.date_posted));
    let records: Vec<ListingRecord> = listings.iter().map(Listing::to_record).collect();
    let mut body = serde_json::to_string_pretty(&records)?;
    body.push('\n');
    Ok(body)
}
