use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ListingState {
    Active,
    #[default]
    Deleted,
}

impl ListingState {
    /// Unknown values fall back to `Deleted` so a damaged record is archived
    /// rather than republished.
    pub fn parse_lenient(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "active" => ListingState::Active,
            _ => ListingState::Deleted,
        }
    }
}

/// One marketplace ad. The URL is its identity across scrapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub title: String,
    pub price: f64,
    pub url: String,
    pub date_posted: String,
    pub date: DateTime<FixedOffset>,
    pub description: String,
    pub photos: Vec<String>,
    pub state: ListingState,
}

impl Listing {
    /// A listing as seen on the profile page: no detail yet, currently online.
    pub fn scraped(
        title: impl Into<String>,
        price: f64,
        url: impl Into<String>,
        date_posted: impl Into<String>,
        date: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            title: title.into(),
            price,
            url: url.into(),
            date_posted: date_posted.into(),
            date,
            description: String::new(),
            photos: Vec::new(),
            state: ListingState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ListingState::Active
    }

    pub fn has_photos(&self) -> bool {
        !self.photos.is_empty()
    }

    /// Builds a listing from a persisted record, applying one default per
    /// field. Older snapshot files may lack `state`, `date` or the detail
    /// fields entirely.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            record
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let price = match record.get("price") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };

        let photos = record
            .get("photos")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let state = record
            .get("state")
            .and_then(Value::as_str)
            .map(ListingState::parse_lenient)
            .unwrap_or(ListingState::Deleted);

        let date = record
            .get("date")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(now);

        Self {
            title: text("title"),
            price,
            url: text("url"),
            date_posted: text("date_posted"),
            date,
            description: text("description"),
            photos,
            state,
        }
    }

    pub fn to_record(&self) -> ListingRecord {
        ListingRecord {
            title: self.title.clone(),
            price: self.price,
            url: self.url.clone(),
            date_posted: self.date_posted.clone(),
            date: self.date.to_rfc3339(),
            description: self.description.clone(),
            photos: self.photos.clone(),
            state: self.state,
        }
    }
}

/// Persisted shape of a listing. Field order is the on-disk order.
#[derive(Debug, Clone, Serialize)]
pub struct ListingRecord {
    pub title: String,
    pub price: f64,
    pub url: String,
    pub date_posted: String,
    pub date: String,
    pub description: String,
    pub photos: Vec<String>,
    pub state: ListingState,
}

pub fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Accepts RFC 3339 or a naive ISO-8601 timestamp, the latter read as local time.
pub fn parse_timestamp(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(input) {
        return Some(value);
    }
    let naive = input.parse::<NaiveDateTime>().ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|value| value.fixed_offset())
}
