use crate::models::{Listing, ListingState};
use std::collections::HashMap;
use tracing::{debug, info};

/// Reconciles the stored snapshot with a fresh profile scrape, keyed by URL.
///
/// Every stored listing starts out deleted; a scraped listing with the same
/// URL refreshes title, price, dates and state in place while keeping the
/// description and photos gathered by earlier detail passes. Unknown URLs are
/// appended as new entries.
///
/// URL is the only identity. A URL reissued for an unrelated ad is treated as
/// the same listing.
pub fn merge(existing: Vec<Listing>, scraped: Vec<Listing>) -> Vec<Listing> {
    let mut merged: Vec<Listing> = Vec::with_capacity(existing.len() + scraped.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(existing.len());

    for mut listing in existing {
        listing.state = ListingState::Deleted;
        match index.get(&listing.url) {
            Some(&slot) => merged[slot] = listing,
            None => {
                index.insert(listing.url.clone(), merged.len());
                merged.push(listing);
            }
        }
    }

    let mut refreshed = 0usize;
    let mut added = 0usize;
    for listing in scraped {
        match index.get(&listing.url) {
            Some(&slot) => {
                let target = &mut merged[slot];
                target.title = listing.title;
                target.price = listing.price;
                target.date_posted = listing.date_posted;
                target.date = listing.date;
                target.state = listing.state;
                refreshed += 1;
            }
            None => {
                debug!(target = "lbc.merge", url = %listing.url, "listing_added");
                index.insert(listing.url.clone(), merged.len());
                merged.push(listing);
                added += 1;
            }
        }
    }

    let deleted = merged
        .iter()
        .filter(|listing| listing.state == ListingState::Deleted)
        .count();
    info!(
        target = "lbc.merge",
        total = merged.len(),
        refreshed,
        added,
        deleted,
        "snapshots_merged"
    );
    merged
}
