use reqwest::Client;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("lbc-sync/", env!("CARGO_PKG_VERSION"));

/// Shared client for the catalog API and photo downloads.
///
/// Only the connect phase is bounded by default; a whole-request timeout is
/// applied when `HTTP_TIMEOUT_SECS` is set.
pub fn build_client() -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(connect));
    if let Some(secs) = timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build().unwrap_or_else(|_| Client::new())
}
