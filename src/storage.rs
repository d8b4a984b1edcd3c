// Storage module - handles document persistence to MongoDB
//
// This module is responsible for:
// 1. Provisioning destination collections (idempotently) before any write
// 2. Writing enriched documents, with optional explicit identity for
//    overwrite-by-id semantics and a TTL for automatic expiry
// 3. Providing the DocumentStore trait the orchestrator writes against

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::Utc;
use mongodb::error::{CommandError, ErrorKind};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, IndexModel};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::collector::schema::SchemaDescriptor;

/// Errors that can occur while provisioning or writing
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to provision collection '{collection}': {source}")]
    ProvisionError {
        collection: String,
        source: mongodb::error::Error,
    },

    #[error("failed to write document to '{collection}': {source}")]
    WriteError {
        collection: String,
        source: mongodb::error::Error,
    },

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Destination sink for enriched documents.
///
/// The production implementation is [`MongoStore`]; tests substitute an
/// in-memory recording store. Write semantics:
/// - `id = None`: the store assigns identity, each write appends
/// - `id = Some`: upsert by identity, a repeated write overwrites
///   (last write wins)
///
/// Every stored document expires `ttl` after the write; the store reaps
/// expired documents on its own.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ensures a destination collection exists with its expected indexes.
    ///
    /// Idempotent: an "already exists" rejection from the store is success,
    /// since that is the steady-state condition on every run after the
    /// first. Any other rejection propagates.
    async fn ensure_collection(
        &self,
        name: &str,
        schema: &SchemaDescriptor,
    ) -> Result<(), StorageError>;

    /// Writes one document of the given kind to a collection.
    async fn write_document(
        &self,
        collection: &str,
        kind: &str,
        body: Document,
        id: Option<Bson>,
        ttl: Duration,
    ) -> Result<(), StorageError>;

    /// Writes a document with a single retry on failure.
    ///
    /// Returns whether the document was stored. Failures are logged rather
    /// than propagated so that one bad record never blocks the rest of a
    /// collection step.
    async fn write_document_safe(
        &self,
        collection: &str,
        kind: &str,
        body: Document,
        id: Option<Bson>,
        ttl: Duration,
    ) -> bool {
        const MAX_RETRIES: u32 = 1;

        for attempt in 0..=MAX_RETRIES {
            match self
                .write_document(collection, kind, body.clone(), id.clone(), ttl)
                .await
            {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Stored {} document after {} retry(ies)", kind, attempt);
                    }
                    return true;
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        error!(
                            "Failed to store {} document (attempt {}): {}. Retrying...",
                            kind,
                            attempt + 1,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    } else {
                        error!(
                            "Failed to store {} document after {} attempts: {}. Giving up.",
                            kind,
                            attempt + 1,
                            e
                        );
                    }
                }
            }
        }

        false
    }
}

/// MongoDB-backed document store
///
/// Each destination partition is a MongoDB collection; explicit document
/// identity maps to `_id`, and expiry is enforced by a TTL index on the
/// `expire_at` field stamped onto every document.
pub struct MongoStore {
    /// MongoDB client for database operations
    client: Client,

    /// Database name where documents are stored
    database_name: String,
}

impl MongoStore {
    /// Creates a new MongoStore instance
    ///
    /// # Arguments
    /// * `client` - MongoDB client (shared reference from ConfigManager)
    /// * `database_name` - Name of the database where documents are stored
    pub fn new(client: &Client, database_name: &str) -> Self {
        MongoStore {
            client: client.clone(),
            database_name: database_name.to_string(),
        }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.database_name).collection(name)
    }

    /// Creates the indexes every destination collection carries:
    /// a compound query index and the TTL index that reaps expired documents.
    async fn create_indexes(&self, collection_name: &str) -> Result<(), mongodb::error::Error> {
        let collection = self.collection(collection_name);

        let query_index = IndexModel::builder()
            .keys(doc! {
                "array_id": 1,
                "timeofquery": -1  // Descending for most recent first
            })
            .options(
                IndexOptions::builder()
                    .name("array_timeofquery_idx".to_string())
                    .build(),
            )
            .build();

        // expire_after(0) makes expire_at itself the deadline, so every
        // document carries its own TTL.
        let ttl_index = IndexModel::builder()
            .keys(doc! { "expire_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("expire_at_ttl_idx".to_string())
                    .expire_after(Duration::from_secs(0))
                    .build(),
            )
            .build();

        collection.create_index(query_index, None).await?;
        collection.create_index(ttl_index, None).await?;

        Ok(())
    }
}

/// Whether a provisioning rejection means the collection is already there.
///
/// MongoDB reports this as the NamespaceExists command error (code 48),
/// the equivalent of an HTTP 409/400 on an index-create call.
fn is_already_exists(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Command(CommandError { code: 48, .. })
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ensure_collection(
        &self,
        name: &str,
        schema: &SchemaDescriptor,
    ) -> Result<(), StorageError> {
        let db = self.client.database(&self.database_name);

        match db.create_collection(name, None).await {
            Ok(()) => {
                info!("Created collection '{}' for kind '{}'", name, schema.kind);
            }
            Err(e) if is_already_exists(&e) => {
                // Steady state on every run after the first.
                debug!("Collection '{}' already exists", name);
            }
            Err(e) => {
                error!("Failed to create collection '{}': {}", name, e);
                return Err(StorageError::ProvisionError {
                    collection: name.to_string(),
                    source: e,
                });
            }
        }

        // Creating an index that already exists with the same definition is
        // a no-op, so this is safe to repeat on every run.
        self.create_indexes(name)
            .await
            .map_err(|e| StorageError::ProvisionError {
                collection: name.to_string(),
                source: e,
            })
    }

    async fn write_document(
        &self,
        collection_name: &str,
        kind: &str,
        mut body: Document,
        id: Option<Bson>,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let expire_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StorageError::InvalidDocument(format!("ttl out of range: {}", e)))?;

        body.insert("doc_type", kind);
        body.insert(
            "expire_at",
            Bson::DateTime(bson::DateTime::from_chrono(expire_at)),
        );

        debug!(
            "Storing {} document to collection '{}' (id: {:?}, ttl: {:?})",
            kind, collection_name, id, ttl
        );

        let collection = self.collection(collection_name);

        let result = match id {
            Some(id) => {
                // Upsert by identity: repeated writes for the same id
                // overwrite, giving last-write-wins.
                body.insert("_id", id.clone());
                collection
                    .replace_one(
                        doc! { "_id": id },
                        body,
                        ReplaceOptions::builder().upsert(true).build(),
                    )
                    .await
                    .map(|_| ())
            }
            None => collection.insert_one(body, None).await.map(|_| ()),
        };

        result.map_err(|e| {
            error!(
                "Failed to store {} document in collection '{}': {}",
                kind, collection_name, e
            );
            StorageError::WriteError {
                collection: collection_name.to_string(),
                source: e,
            }
        })
    }
}
