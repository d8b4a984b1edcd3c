// Configuration module - handles MongoDB connection and settings retrieval
//
// This module is responsible for:
// 1. Connecting to MongoDB using the provided connection string
// 2. Fetching collector settings from the CollectorSettings collection
// 3. Loading the registered arrays from the ArrayConfigs collection
// 4. Providing strongly-typed access to settings and array contexts

use futures_util::TryStreamExt;
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("MongoDB connection failed: {0}")]
    MongoConnectionError(#[from] mongodb::error::Error),

    #[error("Settings document not found for key: {0}")]
    SettingsNotFound(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Collector-wide settings loaded from MongoDB
///
/// One document in the CollectorSettings collection, identified by key.
///
/// # Example MongoDB Document
/// ```json
/// {
///   "key": "site-1",
///   "index_prefix": "pureelk",
///   "interval_secs": 60,
///   "volume_concurrency": 4
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Unique identifier for this configuration (e.g., "site-1")
    pub key: String,

    /// Prefix for every destination collection name
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Collection cadence in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound on concurrent per-volume fetches within one run
    #[serde(default = "default_volume_concurrency")]
    pub volume_concurrency: usize,
}

fn default_index_prefix() -> String {
    "pureelk".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_volume_concurrency() -> usize {
    4
}

/// Registration of one storage array to collect from
///
/// One document per array in the ArrayConfigs collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayConfig {
    /// Array display name, denormalized onto every stored document
    pub name: String,

    /// Array unique identifier
    pub array_id: String,

    /// Base URL of the array's management API
    pub api_endpoint: String,

    /// API token used to establish the session
    pub api_token: String,

    /// How long collected documents live before the store reaps them
    pub data_ttl_days: u64,

    /// Disabled arrays stay registered but are not collected
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ArrayConfig {
    /// Checks the fields a collection run depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "array registration missing name".to_string(),
            ));
        }
        if self.array_id.is_empty() {
            return Err(ConfigError::InvalidSettings(format!(
                "array '{}' missing array_id",
                self.name
            )));
        }
        if self.api_endpoint.is_empty() {
            return Err(ConfigError::InvalidSettings(format!(
                "array '{}' missing api_endpoint",
                self.name
            )));
        }
        if self.data_ttl_days == 0 {
            return Err(ConfigError::InvalidSettings(format!(
                "array '{}' has zero data_ttl_days",
                self.name
            )));
        }
        Ok(())
    }

    /// Builds the immutable per-run context for this array.
    pub fn context(&self) -> ArrayContext {
        ArrayContext {
            name: self.name.clone(),
            array_id: self.array_id.clone(),
            data_ttl: Duration::from_secs(self.data_ttl_days * 24 * 3600),
        }
    }
}

/// Immutable array identity and retention context for one collection run
#[derive(Debug, Clone)]
pub struct ArrayContext {
    /// Array display name
    pub name: String,

    /// Array unique identifier
    pub array_id: String,

    /// Expiry applied to every document written for this array
    pub data_ttl: Duration,
}

/// Configuration manager for the collector
///
/// Handles MongoDB connection, settings retrieval and array registrations.
pub struct ConfigManager {
    /// MongoDB client instance
    client: Client,

    /// Database name where configuration collections reside
    database_name: String,
}

impl ConfigManager {
    /// Creates a new ConfigManager and establishes the MongoDB connection
    ///
    /// # Arguments
    /// * `connection_string` - MongoDB connection URI (e.g., "mongodb://localhost:27017")
    /// * `database_name` - Name of the database to use (optional, defaults to "pureelk")
    pub async fn new(
        connection_string: &str,
        database_name: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let client = Client::with_uri_str(connection_string).await?;

        // Verify connection by listing databases (lightweight operation)
        match client.list_database_names(None, None).await {
            Ok(_) => info!("Successfully connected to MongoDB"),
            Err(e) => {
                warn!("MongoDB connection verification failed: {}", e);
                return Err(ConfigError::MongoConnectionError(e));
            }
        }

        let database_name = database_name.unwrap_or("pureelk").to_string();

        Ok(ConfigManager {
            client,
            database_name,
        })
    }

    fn get_database(&self) -> Database {
        self.client.database(&self.database_name)
    }

    /// Fetches collector settings for a specific key
    ///
    /// # MongoDB Query
    /// Executes: `db.CollectorSettings.findOne({ key: "<key>" })`
    pub async fn load_settings(&self, key: &str) -> Result<CollectorSettings, ConfigError> {
        info!("Loading collector settings for key: {}", key);

        let collection: Collection<CollectorSettings> =
            self.get_database().collection("CollectorSettings");

        let filter = mongodb::bson::doc! { "key": key };

        match collection.find_one(filter, None).await? {
            Some(settings) => {
                info!(
                    "Loaded settings: prefix '{}', interval {}s, volume concurrency {}",
                    settings.index_prefix, settings.interval_secs, settings.volume_concurrency
                );
                Ok(settings)
            }
            None => {
                warn!("No settings found for key: {}", key);
                Err(ConfigError::SettingsNotFound(key.to_string()))
            }
        }
    }

    /// Loads all valid array registrations.
    ///
    /// Registrations that fail validation are logged and skipped so one
    /// broken document does not take down collection for the healthy arrays.
    pub async fn load_arrays(&self) -> Result<Vec<ArrayConfig>, ConfigError> {
        let collection: Collection<ArrayConfig> = self.get_database().collection("ArrayConfigs");

        let mut cursor = collection.find(None, None).await?;
        let mut arrays = Vec::new();

        while let Some(config) = cursor.try_next().await? {
            match config.validate() {
                Ok(()) => {
                    info!(
                        "  array '{}' ({}) - endpoint: {}, ttl: {}d, enabled: {}",
                        config.name,
                        config.array_id,
                        config.api_endpoint,
                        config.data_ttl_days,
                        config.enabled
                    );
                    arrays.push(config);
                }
                Err(e) => warn!("Skipping invalid array registration: {}", e),
            }
        }

        if arrays.is_empty() {
            warn!("No array registrations found in ArrayConfigs");
        }

        Ok(arrays)
    }

    /// Returns a reference to the MongoDB client
    ///
    /// Used by the storage module to access MongoDB for writing documents
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Returns the database name
    pub fn database_name(&self) -> &str {
        &self.database_name
    }
}
