// Collection run - time partitioning for one collection cycle
//
// Derives the destination collection names for a run and fixes the single
// shared query timestamp that every document of the run carries.

use chrono::{DateTime, SecondsFormat, Utc};

/// Ephemeral state for one collection cycle.
///
/// All documents emitted during a run are stamped with the same
/// `timeofquery` value, captured once here. Wall-clock time keeps advancing
/// while the run fetches and writes, but the stored timestamp never does:
/// that gives dashboards a consistent snapshot to correlate array, volume,
/// alert and audit data from the same cycle.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    /// Shared query timestamp, ISO-8601 UTC with microsecond precision
    pub timeofquery: String,

    /// UTC calendar date of the run, `YYYY-MM-DD`
    pub date_partition: String,

    /// Daily collection for array-level performance documents
    pub arrays_collection: String,

    /// Daily collection for per-volume performance documents
    pub vols_collection: String,

    /// Daily collection for alert message documents
    pub msgs_collection: String,

    /// Daily collection for audit log documents
    pub audit_collection: String,

    /// Non-partitioned collection holding the latest state per array
    pub global_arrays_collection: String,
}

impl CollectionRun {
    /// Computes the run's timestamp and destination names.
    ///
    /// # Arguments
    /// * `prefix` - Destination name prefix (e.g. "pureelk")
    /// * `now` - The wall-clock instant the run started, UTC
    pub fn begin(prefix: &str, now: DateTime<Utc>) -> Self {
        let date_partition = now.format("%Y-%m-%d").to_string();

        CollectionRun {
            timeofquery: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            arrays_collection: format!("{}-arrays-{}", prefix, date_partition),
            vols_collection: format!("{}-vols-{}", prefix, date_partition),
            msgs_collection: format!("{}-msgs-{}", prefix, date_partition),
            audit_collection: format!("{}-audit-{}", prefix, date_partition),
            global_arrays_collection: format!("{}-global-arrays", prefix),
            date_partition,
        }
    }
}
