pub mod aggregator;
pub mod block_detection;
pub mod contracts;
pub mod dispatcher;
pub mod encoding;
pub mod fetcher;
pub mod progress;
pub mod worker;

pub use aggregator::{aggregate_results, AggregateSummary};
pub use contracts::{ListingStore, NullListingStore, Parser};
pub use dispatcher::{DispatchResult, ScrapeDispatcher};
pub use fetcher::{FetchOptions, FetchResult, Fetcher};
pub use progress::{JobProgress, JobSnapshot};
pub use worker::scrape_chunk;
