//! Health-record store target.
//!
//! Every measurement becomes three typed records (weight, body water mass,
//! body fat) owned by this integration's data origin. Records are matched
//! by time because the store assigns its own ids.

mod adapter;
mod memory;
mod records;
mod store;

pub use adapter::{HealthRecordAdapter, HealthSettings, DEFAULT_ORIGIN};
pub use memory::MemoryHealthStore;
pub use records::{local_midnight, HealthRecord, RecordKind, RecordMetadata, TimeRange};
pub use store::{Availability, HealthStore};

use std::sync::Arc;

use scalesync_common::Result;

use crate::registry::{parse_settings, TargetConfig};
use crate::target::SyncTarget;

/// Create a health target from configuration, backed by an in-memory store.
pub fn create_health_target(config: &TargetConfig) -> Result<Arc<dyn SyncTarget>> {
    let settings: HealthSettings = parse_settings(config)?;
    let store = Arc::new(MemoryHealthStore::new());
    Ok(Arc::new(HealthRecordAdapter::new(config.name.clone(), store, &settings)?))
}
