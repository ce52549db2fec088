//! Fitness REST API target (wger weight entries).

mod adapter;
mod api;
mod client;
mod memory;

pub use adapter::{FitnessApiAdapter, FitnessSettings};
pub use api::{WeightEntry, WeightEntryApi, WeightEntryForm, WeightEntryPage};
pub use client::{WgerClient, DEFAULT_BASE_URL};
pub use memory::MemoryWeightEntryApi;

use std::sync::Arc;
use std::time::Duration;

use scalesync_common::Result;

use crate::registry::{parse_settings, TargetConfig};
use crate::target::SyncTarget;

/// Create a fitness target from configuration.
pub fn create_fitness_target(config: &TargetConfig) -> Result<Arc<dyn SyncTarget>> {
    let settings: FitnessSettings = parse_settings(config)?;
    let client = WgerClient::new(
        &settings.base_url,
        settings.api_key.clone(),
        Duration::from_secs(settings.request_timeout_secs.max(1)),
    )?;
    Ok(Arc::new(FitnessApiAdapter::new(config.name.clone(), Arc::new(client), &settings)?))
}
