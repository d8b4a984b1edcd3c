// Record enrichment - shaping raw API records into storable documents
//
// Pure functions over JSON maps. Enrichment merges a raw record with the
// array's identity, the run's shared timestamp, variant-specific extra
// fields, and tokenizable companion copies of name-like fields. Records are
// taken by value so no caller-visible structure is ever mutated in place.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ArrayContext;

use super::run::CollectionRun;
use super::schema::SchemaDescriptor;

/// A raw counter/statistics record as returned by the array API.
pub type StatsRecord = Map<String, Value>;

/// Field name carrying the run's shared query timestamp on every document.
pub const TIMEOFQUERY_KEY: &str = "timeofquery";

/// Errors raised while deriving fields from a record
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("required field '{0}' is missing from the record")]
    MissingField(&'static str),

    #[error("field '{0}' is not an integer counter (got {1})")]
    NonNumericField(&'static str, Value),

    #[error("array reports zero capacity; percent_free is undefined")]
    ZeroCapacity,
}

/// Merges `overlay` into `base` with overlay fields winning on collision.
///
/// Used to fold space statistics into a performance-monitor record for the
/// same entity: the space record is the authoritative source for any key
/// both records carry.
pub fn merge_overlay(base: &mut StatsRecord, overlay: StatsRecord) {
    for (key, value) in overlay {
        base.insert(key, value);
    }
}

/// Enriches a raw record into a storable document body.
///
/// Adds, in order:
/// 1. `array_name` / `array_id` (denormalized onto every record kind so each
///    is queryable without joins)
/// 2. any variant-specific `extra` fields (e.g. `vol_name` for volume docs)
/// 3. a tokenizable `<field>_a` copy of each companion field the destination
///    schema declares, taken from the record after steps 1-2
/// 4. the run's shared `timeofquery`
///
/// The record is consumed and a new map returned; callers that write the
/// same document to two destinations clone the result.
pub fn enrich(
    mut record: StatsRecord,
    context: &ArrayContext,
    run: &CollectionRun,
    schema: &SchemaDescriptor,
    extra: &[(&str, &str)],
) -> StatsRecord {
    record.insert("array_name".to_string(), Value::String(context.name.clone()));
    record.insert(
        "array_id".to_string(),
        Value::String(context.array_id.clone()),
    );

    for (key, value) in extra {
        record.insert((*key).to_string(), Value::String((*value).to_string()));
    }

    // Companion copies live outside the exact-match field set, so the
    // destination treats them as free text.
    for field in schema.text_companions {
        if let Some(value) = record.get(*field).cloned() {
            record.insert(format!("{}_a", field), value);
        }
    }

    record.insert(
        TIMEOFQUERY_KEY.to_string(),
        Value::String(run.timeofquery.clone()),
    );

    record
}

/// Computes the derived capacity fields for an array document.
///
/// `free = capacity - total` and `percent_free = free / capacity` are
/// precomputed here so dashboards need no scripted fields. Both `capacity`
/// and `total` must be present as integer counters; a zero capacity is a
/// defined failure rather than a stored NaN or Infinity.
pub fn add_capacity_fields(record: &mut StatsRecord) -> Result<(), EnrichError> {
    let capacity = integer_field(record, "capacity")?;
    let total = integer_field(record, "total")?;

    if capacity == 0 {
        return Err(EnrichError::ZeroCapacity);
    }

    let free = capacity - total;
    record.insert("free".to_string(), Value::from(free));
    record.insert(
        "percent_free".to_string(),
        Value::from(free as f64 / capacity as f64),
    );

    Ok(())
}

fn integer_field(record: &StatsRecord, name: &'static str) -> Result<i64, EnrichError> {
    let value = record
        .get(name)
        .ok_or(EnrichError::MissingField(name))?;

    value
        .as_i64()
        .ok_or_else(|| EnrichError::NonNumericField(name, value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::schema::{ARRAY_SCHEMA, VOLUME_SCHEMA};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn test_context() -> ArrayContext {
        ArrayContext {
            name: "array-1".to_string(),
            array_id: "abc123".to_string(),
            data_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }

    fn test_run() -> CollectionRun {
        let now = Utc.with_ymd_and_hms(2016, 3, 14, 9, 26, 53).unwrap();
        CollectionRun::begin("pureelk", now)
    }

    fn record(value: Value) -> StatsRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_overlay_wins_on_collision() {
        let mut base = record(json!({"writes_per_sec": 10, "total": 1}));
        let overlay = record(json!({"total": 400, "snapshots": 7}));

        merge_overlay(&mut base, overlay);

        assert_eq!(base["writes_per_sec"], json!(10));
        assert_eq!(base["total"], json!(400));
        assert_eq!(base["snapshots"], json!(7));
    }

    #[test]
    fn test_enrich_adds_identity_and_timestamp() {
        let doc = enrich(
            record(json!({"capacity": 1000})),
            &test_context(),
            &test_run(),
            &ARRAY_SCHEMA,
            &[],
        );

        assert_eq!(doc["array_name"], json!("array-1"));
        assert_eq!(doc["array_id"], json!("abc123"));
        assert_eq!(doc["array_name_a"], json!("array-1"));
        assert_eq!(doc[TIMEOFQUERY_KEY], json!("2016-03-14T09:26:53.000000Z"));
    }

    #[test]
    fn test_enrich_emits_volume_companions() {
        let doc = enrich(
            record(json!({"reads_per_sec": 5})),
            &test_context(),
            &test_run(),
            &VOLUME_SCHEMA,
            &[("vol_name", "vol-7")],
        );

        assert_eq!(doc["vol_name"], json!("vol-7"));
        assert_eq!(doc["vol_name_a"], json!("vol-7"));
        assert_eq!(doc["array_name_a"], json!("array-1"));
    }

    #[test]
    fn test_capacity_fields_exact() {
        let mut doc = record(json!({"capacity": 1000, "total": 400}));
        add_capacity_fields(&mut doc).unwrap();

        assert_eq!(doc["free"], json!(600));
        assert_eq!(doc["percent_free"], json!(0.6));
    }

    #[test]
    fn test_zero_capacity_is_an_error() {
        let mut doc = record(json!({"capacity": 0, "total": 0}));
        let err = add_capacity_fields(&mut doc).unwrap_err();

        assert!(matches!(err, EnrichError::ZeroCapacity));
        // Nothing derived lands in the record on failure.
        assert!(!doc.contains_key("percent_free"));
    }

    #[test]
    fn test_missing_capacity_is_an_error() {
        let mut doc = record(json!({"total": 400}));
        assert!(matches!(
            add_capacity_fields(&mut doc),
            Err(EnrichError::MissingField("capacity"))
        ));
    }

    #[test]
    fn test_non_numeric_capacity_is_an_error() {
        let mut doc = record(json!({"capacity": "big", "total": 400}));
        assert!(matches!(
            add_capacity_fields(&mut doc),
            Err(EnrichError::NonNumericField("capacity", _))
        ));
    }
}
