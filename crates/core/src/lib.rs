pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, SiteConfig};
pub use error::{BlockKind, ScrapeError};
pub use types::*;
