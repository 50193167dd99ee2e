pub mod dates;
pub mod webdriver;

use crate::models::{self, Listing};
use async_trait::async_trait;
use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub use webdriver::WebDriverBrowser;

const CARD_SELECTOR: &str = r#"article[data-test-id="ad"]"#;
const CARD_TITLE_SELECTOR: &str = r#"p[data-test-id="adcard-title"]"#;
const CARD_PRICE_SELECTOR: &str = r#"span[data-qa-id="aditem_price"]"#;
const CARD_LINK_SELECTOR: &str = r#"a[href^="/ad/"]"#;
const DESCRIPTION_SELECTOR: &str = "#readme-content";
const GALLERY_IMAGE_SELECTOR: &str = "button > img";
const SEE_MORE_LABEL: &str = "Voir plus";
const MISSING: &str = "N/A";

static GALLERY_BUTTON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Voir les \d+ photos").expect("gallery button pattern"));

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("webdriver request failed: {0}")]
    Request(String),
    #[error("webdriver error {status}: {message}")]
    Protocol { status: u16, message: String },
    #[error("no element matches {0}")]
    NoSuchElement(String),
    #[error("webdriver did not answer in time: {0}")]
    Timeout(String),
}

/// Opaque reference to an element of the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// The page primitives the scraper relies on.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    /// First match under `scope` (or the document). With a timeout, keeps
    /// looking until it expires.
    async fn find(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ElementHandle>, BrowserError>;
    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError>;
    async fn text(&self, element: &ElementHandle) -> Result<String, BrowserError>;
    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, BrowserError>;
    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;
}

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub base_url: String,
    pub max_pages: usize,
    pub page_settle: Duration,
    pub detail_settle: Duration,
    pub next_page_timeout: Duration,
    /// Year the posting-date element's `title` attribute must mention.
    pub year: i32,
}

impl ScrapeOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_pages: 99,
            page_settle: Duration::from_secs(2),
            detail_settle: Duration::from_secs(1),
            next_page_timeout: Duration::from_secs(2),
            year: models::now().year(),
        }
    }
}

/// Lightweight pass over the seller's profile pages. Every card becomes an
/// active listing without description or photos.
pub async fn scrape_profile<B: Browser + ?Sized>(
    browser: &B,
    options: &ScrapeOptions,
    identifier: &str,
) -> Result<Vec<Listing>, BrowserError> {
    let url = format!("{}/profile/{identifier}", options.base_url);
    browser.navigate(&url).await?;

    let mut listings = Vec::new();
    for page in 1..=options.max_pages {
        sleep(options.page_settle).await;

        let cards = browser.find_all(None, CARD_SELECTOR).await?;
        info!(target = "lbc.scrape", page, cards = cards.len(), "profile_page_scraped");
        for card in &cards {
            listings.push(parse_card(browser, options, card).await?);
        }

        let next_selector = format!("button[title='Page {}']", page + 1);
        let next = browser
            .find(None, &next_selector, Some(options.next_page_timeout))
            .await;
        match next {
            Ok(Some(button)) => {
                if let Err(err) = browser.click(&button).await {
                    warn!(target = "lbc.scrape", page, error = %err, "next_page_click_failed");
                    break;
                }
            }
            _ => break,
        }
    }
    Ok(listings)
}

async fn parse_card<B: Browser + ?Sized>(
    browser: &B,
    options: &ScrapeOptions,
    card: &ElementHandle,
) -> Result<Listing, BrowserError> {
    let title = match browser.find(Some(card), CARD_TITLE_SELECTOR, None).await? {
        Some(element) => browser.text(&element).await?,
        None => MISSING.to_string(),
    };

    let price_text = match browser.find(Some(card), CARD_PRICE_SELECTOR, None).await? {
        Some(element) => browser.text(&element).await?,
        None => String::new(),
    };
    let price = parse_price(&price_text).unwrap_or_else(|| {
        warn!(target = "lbc.scrape", title = %title, raw = %price_text, "price_unreadable");
        0.0
    });

    let href = match browser.find(Some(card), CARD_LINK_SELECTOR, None).await? {
        Some(element) => browser.attribute(&element, "href").await?,
        None => None,
    };
    let url = match href.filter(|href| !href.is_empty()) {
        Some(href) => format!("{}{href}", options.base_url),
        None => MISSING.to_string(),
    };

    // The date element is optional on some cards.
    let date_selector = format!(r#"p[title*="{}"]"#, options.year);
    let date_posted = match browser.find(Some(card), &date_selector, None).await {
        Ok(Some(element)) => browser
            .text(&element)
            .await
            .unwrap_or_else(|_| MISSING.to_string()),
        _ => MISSING.to_string(),
    };

    let now = models::now();
    let date = dates::parse_posted_date(&date_posted, now).unwrap_or(now);

    Ok(Listing::scraped(title, price, url, date_posted, date))
}

/// Keeps the digits of a displayed price (`1 250 €` → 1250).
pub fn parse_price(raw: &str) -> Option<f64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Thumbnails in the gallery point at the small rendition.
pub fn full_size_photo(url: &str) -> String {
    url.replace("ad-thumb", "ad-large")
}

#[derive(Debug)]
pub enum DetailOutcome {
    Filled { photos: usize },
    Skipped,
    Failed(BrowserError),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DetailTally {
    pub filled: usize,
    pub photos: usize,
    pub failed: usize,
}

impl DetailTally {
    pub fn from_outcomes(outcomes: &[DetailOutcome]) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            match outcome {
                DetailOutcome::Filled { photos } => {
                    tally.filled += 1;
                    tally.photos += photos;
                }
                DetailOutcome::Failed(_) => tally.failed += 1,
                DetailOutcome::Skipped => {}
            }
        }
        tally
    }
}

/// Fills description and photos for active listings that have none yet. A
/// failure leaves the listing untouched so the next run retries it.
pub async fn scrape_details<B: Browser + ?Sized>(
    browser: &B,
    options: &ScrapeOptions,
    listings: &mut [Listing],
) -> Vec<DetailOutcome> {
    let mut outcomes = Vec::with_capacity(listings.len());
    for listing in listings.iter_mut() {
        outcomes.push(scrape_detail(browser, options, listing).await);
    }
    let tally = DetailTally::from_outcomes(&outcomes);
    info!(
        target = "lbc.scrape",
        filled = tally.filled,
        photos = tally.photos,
        failed = tally.failed,
        total = outcomes.len(),
        "detail_pass_finished"
    );
    outcomes
}

pub async fn scrape_detail<B: Browser + ?Sized>(
    browser: &B,
    options: &ScrapeOptions,
    listing: &mut Listing,
) -> DetailOutcome {
    if listing.has_photos() || !listing.is_active() {
        info!(target = "lbc.scrape", url = %listing.url, "detail_skipped_has_photos_or_inactive");
        return DetailOutcome::Skipped;
    }
    match read_detail(browser, options, &listing.url).await {
        Ok((description, photos)) => {
            listing.description = description;
            listing.photos = photos;
            DetailOutcome::Filled {
                photos: listing.photos.len(),
            }
        }
        Err(err) => {
            error!(target = "lbc.scrape", url = %listing.url, error = ?err, "detail_scrape_failed");
            DetailOutcome::Failed(err)
        }
    }
}

async fn read_detail<B: Browser + ?Sized>(
    browser: &B,
    options: &ScrapeOptions,
    url: &str,
) -> Result<(String, Vec<String>), BrowserError> {
    browser.navigate(url).await?;
    sleep(options.detail_settle).await;

    let see_more = button_matching(browser, |label| label == SEE_MORE_LABEL)
        .await?
        .ok_or_else(|| BrowserError::NoSuchElement(format!("button \"{SEE_MORE_LABEL}\"")))?;
    browser.click(&see_more).await?;

    let description = match browser.find(None, DESCRIPTION_SELECTOR, None).await? {
        Some(element) => browser.text(&element).await?,
        None => String::new(),
    };

    let gallery = button_matching(browser, |label| GALLERY_BUTTON.is_match(label))
        .await?
        .ok_or_else(|| BrowserError::NoSuchElement("gallery button".into()))?;
    browser.click(&gallery).await?;

    let mut photos = Vec::new();
    for image in browser.find_all(None, GALLERY_IMAGE_SELECTOR).await? {
        match browser.attribute(&image, "src").await? {
            Some(src) if !src.is_empty() => photos.push(full_size_photo(&src)),
            _ => {}
        }
    }
    Ok((description, photos))
}

async fn button_matching<B, P>(browser: &B, predicate: P) -> Result<Option<ElementHandle>, BrowserError>
where
    B: Browser + ?Sized,
    P: Fn(&str) -> bool,
{
    for button in browser.find_all(None, "button").await? {
        let label = browser.text(&button).await?;
        if predicate(label.trim()) {
            return Ok(Some(button));
        }
    }
    Ok(None)
}
