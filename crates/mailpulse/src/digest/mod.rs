//! Per-(user, local day, period) digests of summarized messages.

pub mod aggregator;
pub mod merge;
pub mod model;
pub mod window;

pub use aggregator::DigestAggregator;
pub use merge::{merge_buckets, DEFAULT_PRIORITY};
pub use model::{
    total_count, CategoryBuckets, Digest, DigestPeriod, DigestRead, DigestStatus, SummaryEntry,
};
pub use window::PeriodWindows;
