// Scheduler module - manages periodic collection tasks
//
// This module implements the core scheduling logic using Tokio tasks.
// Each registered array runs on the configured interval in its own task.
//
// # Architecture
// - Uses Tokio's interval timer for periodic execution
// - Each array runs in its own async task
// - Tasks run concurrently and independently
// - Failures for one array don't affect others
// - Within one task, ticks wait for the previous run to finish, so runs
//   for the same array never overlap

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::client::RestArrayClient;
use crate::collector::ArrayCollector;
use crate::config::{ArrayConfig, CollectorSettings};
use crate::storage::DocumentStore;

/// Scheduler that drives periodic collection runs
///
/// One Tokio task per enabled array, each ticking at the configured
/// cadence. A failed run is logged; the next tick is the retry.
pub struct CollectionScheduler {
    /// Collector settings loaded from MongoDB
    settings: Arc<CollectorSettings>,

    /// Destination store shared by all collection tasks
    store: Arc<dyn DocumentStore>,
}

impl CollectionScheduler {
    /// Creates a new CollectionScheduler instance
    pub fn new(settings: CollectorSettings, store: Arc<dyn DocumentStore>) -> Self {
        CollectionScheduler {
            settings: Arc::new(settings),
            store,
        }
    }

    /// Starts one collection task per enabled array and runs forever.
    ///
    /// # Behavior
    /// - Disabled registrations are skipped
    /// - Tasks run until the process is terminated
    /// - Errors in a run are logged but don't stop the task
    pub async fn start(self, arrays: Vec<ArrayConfig>) {
        info!(
            "Starting collection scheduler ({}s cadence)",
            self.settings.interval_secs
        );

        let mut handles = Vec::new();

        for array in arrays {
            if !array.enabled {
                warn!("Array '{}' is disabled, skipping", array.name);
                continue;
            }

            info!(
                "Scheduling array '{}' every {}s (prefix '{}')",
                array.name, self.settings.interval_secs, self.settings.index_prefix
            );

            // Clone Arc references for this task
            let settings = Arc::clone(&self.settings);
            let store = Arc::clone(&self.store);

            let handle = tokio::spawn(async move {
                Self::run_array_task(array, settings, store).await;
            });

            handles.push(handle);
        }

        info!("Successfully started {} collection task(s)", handles.len());

        // Wait for all tasks to complete (they run forever unless there's a critical error)
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Collection task panicked: {}", e);
            }
        }

        error!("All collection tasks have stopped");
    }

    /// Runs the collection loop for a single array.
    async fn run_array_task(
        array: ArrayConfig,
        settings: Arc<CollectorSettings>,
        store: Arc<dyn DocumentStore>,
    ) {
        info!(
            "Starting collection loop for array '{}' (every {}s)",
            array.name, settings.interval_secs
        );

        let mut interval_timer = interval(Duration::from_secs(settings.interval_secs));
        // A run that overruns the cadence delays the next tick instead of
        // bursting, keeping per-array runs serialized.
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval_timer.tick().await;
            Self::collect_array(&array, &settings, &store).await;
        }
    }

    /// Performs one collection run for an array. Returns whether the run
    /// completed without an aborting error.
    async fn collect_array(
        array: &ArrayConfig,
        settings: &CollectorSettings,
        store: &Arc<dyn DocumentStore>,
    ) -> bool {
        // A fresh session per run sidesteps session-expiry bookkeeping.
        let api = match RestArrayClient::connect(&array.api_endpoint, &array.api_token).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                error!("Failed to connect to array '{}': {}", array.name, e);
                return false;
            }
        };

        let collector = ArrayCollector::new(
            api,
            Arc::clone(store),
            array.context(),
            settings.index_prefix.clone(),
            settings.volume_concurrency,
        );

        match collector.collect().await {
            Ok(summary) if summary.is_clean() => {
                info!(
                    "Collected {} document(s) for array '{}'",
                    summary.total_docs(),
                    array.name
                );
                true
            }
            Ok(summary) => {
                warn!(
                    "Partial collection for array '{}': {} written, {} skipped, {} step failure(s)",
                    array.name,
                    summary.total_docs(),
                    summary.records_skipped,
                    summary.step_failures.len()
                );
                true
            }
            Err(e) => {
                // The next cadence is the retry mechanism.
                error!("Collection run failed for array '{}': {}", array.name, e);
                false
            }
        }
    }

    /// Performs a one-time collection of all arrays (useful for testing)
    ///
    /// Collects each enabled array once without scheduling. Useful for:
    /// - Verifying a new array registration
    /// - Manual collection
    /// - Debugging
    ///
    /// # Returns
    /// Number of arrays collected without an aborting error
    pub async fn collect_once(&self, arrays: Vec<ArrayConfig>) -> usize {
        info!("Running one-time collection");

        let mut success_count = 0;
        let total_count = arrays.len();

        for array in arrays {
            if !array.enabled {
                warn!("Array '{}' is disabled, skipping", array.name);
                continue;
            }

            info!("Collecting array '{}'", array.name);

            if Self::collect_array(&array, &self.settings, &self.store).await {
                success_count += 1;
            }
        }

        info!(
            "One-time collection complete: {}/{} arrays succeeded",
            success_count, total_count
        );

        success_count
    }
}
