//! Data models for scrapeledger.

mod ledger;
mod upload;

pub use ledger::{
    LastRunInfo, LegacyScraperState, LegacyStatistics, LegacyUrlEntry, ProcessedUrl,
    ProcessingStatus, ScraperStatistics,
};
pub use upload::UploadResult;
