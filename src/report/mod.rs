pub mod store;

pub use store::RunReportStore;

/// Timestamp part of a report key. Sorts lexicographically in time order and is
/// safe in file names.
pub const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
