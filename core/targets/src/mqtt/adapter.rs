//! Sync target publishing measurement events to an MQTT broker.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use scalesync_common::{Measurement, SyncResult};

use super::payload::{DeleteMessage, DiscoveryMessage, MeasurementMessage, Topics, CLEAR_PAYLOAD};
use super::publisher::{MessagePublisher, MqttSettings};
use crate::control::TargetControl;
use crate::target::{sync_in_order, FullSyncContext, SyncTarget, TargetKind};

/// Publishes one message per operation; success is the broker's acknowledgement.
pub struct MessageBusAdapter {
    name: String,
    publisher: Arc<dyn MessagePublisher>,
    topics: Topics,
    discovery_topic: Option<String>,
    zone: FixedOffset,
    control: TargetControl,
}

impl MessageBusAdapter {
    /// # Errors
    /// - `Config` if the UTC offset is out of range
    pub fn new(
        name: impl Into<String>,
        publisher: Arc<dyn MessagePublisher>,
        settings: &MqttSettings,
    ) -> scalesync_common::Result<Self> {
        let prefix = settings.topic_prefix.trim_end_matches('/');
        Ok(Self {
            name: name.into(),
            publisher,
            topics: Topics::with_prefix(prefix),
            discovery_topic: settings.discovery.then(|| format!("{}/discovery", prefix)),
            zone: crate::registry::utc_offset(settings.utc_offset_minutes)?,
            control: TargetControl::new(true),
        })
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, message: &T, retain: bool) -> SyncResult<()> {
        let payload = serde_json::to_vec(message).map_err(scalesync_common::Error::from)?;
        self.publisher.publish(topic, payload, retain).await?;
        debug!(target_name = %self.name, "Published to {}", topic);
        Ok(())
    }

    async fn publish_measurement(&self, topic: &str, measurement: &Measurement) -> SyncResult<()> {
        let message = MeasurementMessage::new(measurement, &self.zone);
        self.publish_json(topic, &message, false).await
    }

    async fn announce(&self, topic: &str) {
        let message = DiscoveryMessage::new(&self.name, &self.topics);
        if let Err(failure) = self.publish_json(topic, &message, true).await {
            warn!(target_name = %self.name, "Discovery announcement failed: {}", failure);
        }
    }
}

#[async_trait]
impl SyncTarget for MessageBusAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Mqtt
    }

    fn control(&self) -> &TargetControl {
        &self.control
    }

    async fn connect(&self) -> SyncResult<()> {
        self.publisher.connect().await?;
        info!(target_name = %self.name, "Broker session established");

        if let Some(topic) = &self.discovery_topic {
            self.announce(topic).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    async fn close(&self) -> SyncResult<()> {
        self.publisher.disconnect().await?;
        Ok(())
    }

    async fn full_sync(
        &self,
        measurements: &[Measurement],
        context: &FullSyncContext,
    ) -> SyncResult<()> {
        self.prepare().await?;
        info!(target_name = %self.name, "Publishing {} measurements", measurements.len());
        let topic = self.topics.insert.as_str();
        sync_in_order(&self.name, measurements, context, |m| self.publish_measurement(topic, m)).await
    }

    async fn insert(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;
        self.publish_measurement(&self.topics.insert, measurement).await
    }

    async fn update(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;
        self.publish_measurement(&self.topics.update, measurement).await
    }

    async fn delete(&self, timestamp: DateTime<Utc>) -> SyncResult<()> {
        self.prepare().await?;
        let message = DeleteMessage::new(timestamp, &self.zone);
        self.publish_json(&self.topics.delete, &message, false).await
    }

    async fn clear(&self) -> SyncResult<()> {
        self.prepare().await?;
        self.publisher
            .publish(&self.topics.clear, CLEAR_PAYLOAD.to_vec(), false)
            .await?;
        Ok(())
    }
}
