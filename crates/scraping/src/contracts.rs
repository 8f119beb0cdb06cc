use async_trait::async_trait;
use imotscrape_core::{ExtractedListing, ScrapeError};

/// Site-specific extraction capability (§6). No concrete implementation
/// ships in this crate — callers inject one per site, the way the donor's
/// `NetworkDriver` trait is the seam above which concrete drivers live.
#[async_trait]
pub trait Parser: Send + Sync {
    /// `ExtractSearchResults(body, seed_url) -> [url]`.
    fn extract_search_results(&self, body: &str, seed_url: &str) -> Result<Vec<String>, ScrapeError>;

    /// `ExtractListing(body, url) -> ExtractedListing?`. `Ok(None)` maps to
    /// the worker's `extraction_failed` outcome (§4.11).
    fn extract_listing(&self, body: &str, url: &str) -> Result<Option<ExtractedListing>, ScrapeError>;
}

/// `ListingStore::Save` (§6). At-least-once delivery; the implementation is
/// responsible for deduplicating on `(source_site, external_id)`.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn save(&self, listing: &ExtractedListing) -> Result<(), ScrapeError>;
}

/// In-memory test double used by this crate's own test suite (§6's explicit
/// note that only a null/in-memory double ships alongside the trait).
#[derive(Default)]
pub struct NullListingStore {
    saved: tokio::sync::Mutex<Vec<ExtractedListing>>,
}

impl NullListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn saved(&self) -> Vec<ExtractedListing> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl ListingStore for NullListingStore {
    async fn save(&self, listing: &ExtractedListing) -> Result<(), ScrapeError> {
        let mut saved = self.saved.lock().await;
        if saved
            .iter()
            .any(|l| l.identity() == listing.identity())
        {
            return Ok(());
        }
        saved.push(listing.clone());
        Ok(())
    }
}
