pub mod aggregate;
pub mod args;
pub mod classify;
pub mod error;
pub mod report;
pub mod stats;
pub mod summary;
pub mod utils;

pub use aggregate::{analyze_aggregate_file, Aggregator, Analysis, AnalysisOptions};
pub use args::Args;
pub use classify::DkimMode;
pub use error::{ReportError, Violation};
pub use stats::{AggregateResults, DailyStats};
pub use summary::Summary;
