//! Result aggregation and run artifacts: per-directory reports, the
//! machine-readable run summary, and consolidated metrics compilation.

pub mod aggregate;
pub mod metrics;
pub mod summary;

pub use aggregate::ResultAggregator;
pub use metrics::MetricsCompiler;
pub use summary::StoredRunSummary;
