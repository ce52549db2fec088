//! MQTT broker target.
//!
//! Publish-only: operations are events on per-operation topics and nothing
//! is ever read back from the broker.

mod adapter;
mod payload;
mod publisher;

pub use adapter::MessageBusAdapter;
pub use payload::{
    format_timestamp, DeleteMessage, DiscoveryMessage, MeasurementMessage, Topics, CLEAR_PAYLOAD,
    DATE_FORMAT,
};
#[cfg(test)]
pub use publisher::MockMessagePublisher;
pub use publisher::{MessagePublisher, MqttSettings, RumqttPublisher};

use std::sync::Arc;

use scalesync_common::Result;

use crate::registry::{parse_settings, TargetConfig};
use crate::target::SyncTarget;

/// Create an MQTT target from configuration.
pub fn create_mqtt_target(config: &TargetConfig) -> Result<Arc<dyn SyncTarget>> {
    let settings: MqttSettings = parse_settings(config)?;
    let publisher = Arc::new(RumqttPublisher::new(settings.clone()));
    Ok(Arc::new(MessageBusAdapter::new(config.name.clone(), publisher, &settings)?))
}
