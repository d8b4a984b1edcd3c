// Schema descriptors for the destination collections
//
// One descriptor per document kind. These are immutable configuration passed
// explicitly into provisioning and enrichment; they describe which string
// fields are exact-match identifiers and which of those additionally get a
// tokenizable "_a" companion copy for free-text search and grouping.

/// Describes the expected shape of one destination collection.
///
/// The exact-match fields become part of the collection's indexes when the
/// destination is provisioned. Fields listed in `text_companions` are stored
/// twice by the enricher: once under their own name (exact match, used for
/// filtering) and once with an `_a` suffix (tokenizable, used for search).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// Document kind tag, stored on every document as `doc_type`
    pub kind: &'static str,

    /// String fields treated as exact-match identifiers
    pub exact_fields: &'static [&'static str],

    /// Subset of exact fields that get a duplicate tokenizable `_a` copy
    pub text_companions: &'static [&'static str],
}

/// Array-level performance documents (daily and global collections).
pub const ARRAY_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    kind: "arrayperf",
    exact_fields: &["array_name", "array_id", "hostname"],
    text_companions: &["array_name"],
};

/// Per-volume performance documents.
pub const VOLUME_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    kind: "volperf",
    exact_fields: &["name", "vol_name", "array_name", "array_id"],
    text_companions: &["array_name", "vol_name"],
};

/// Alert message documents.
pub const MESSAGE_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    kind: "arraymsg",
    exact_fields: &[
        "array_name",
        "array_id",
        "category",
        "current_severity",
        "actual",
        "component_name",
        "component_type",
        "details",
        "expected",
        "event",
    ],
    text_companions: &["array_name"],
};

/// Audit log documents.
pub const AUDIT_SCHEMA: SchemaDescriptor = SchemaDescriptor {
    kind: "auditmsg",
    exact_fields: &[
        "array_name",
        "array_id",
        "component_name",
        "component_type",
        "details",
        "event",
        "user",
    ],
    text_companions: &["array_name"],
};
