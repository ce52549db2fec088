//! Target registry for resolving sync targets from configuration.

use chrono::FixedOffset;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use scalesync_common::{Error, Result};

use crate::target::{SyncTarget, TargetKind};

/// Configuration of one sync target.
///
/// `settings` holds the kind-specific options and is interpreted by the
/// factory registered for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub kind: TargetKind,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub settings: Value,
}

impl TargetConfig {
    pub fn new(kind: TargetKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            enabled: true,
            settings: Value::Null,
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Deserialize kind-specific settings, treating absent settings as defaults.
pub(crate) fn parse_settings<T>(config: &TargetConfig) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if config.settings.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.settings.clone()).map_err(|e| {
        Error::Config(format!("Invalid settings for target '{}': {}", config.name, e))
    })
}

/// Fixed zone from a configured UTC offset in minutes.
pub(crate) fn utc_offset(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| Error::Config(format!("UTC offset out of range: {} minutes", minutes)))
}

/// Factory function type for creating targets.
pub type TargetFactory = Box<dyn Fn(&TargetConfig) -> Result<Arc<dyn SyncTarget>> + Send + Sync>;

/// Registry for sync target factories, keyed by target kind.
pub struct TargetRegistry {
    factories: HashMap<TargetKind, TargetFactory>,
}

impl TargetRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a target factory.
    ///
    /// # Preconditions
    /// - `kind` must not be registered yet
    ///
    /// # Errors
    /// - Returns error if the kind is already registered
    pub fn register(&mut self, kind: TargetKind, factory: TargetFactory) -> Result<()> {
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Target kind '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Replace the factory for a kind, registering it if absent.
    pub fn replace(&mut self, kind: TargetKind, factory: TargetFactory) {
        self.factories.insert(kind, factory);
    }

    /// Build a target from its configuration.
    ///
    /// The returned target's gate reflects `config.enabled`.
    ///
    /// # Errors
    /// - Kind not registered
    /// - Settings invalid for the kind
    pub fn resolve(&self, config: &TargetConfig) -> Result<Arc<dyn SyncTarget>> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            Error::NotFound(format!("Target kind '{}' is not registered", config.kind))
        })?;
        let target = factory(config)?;
        target.control().set_enabled(config.enabled);
        Ok(target)
    }

    /// Get list of registered target kinds.
    pub fn kinds(&self) -> Vec<TargetKind> {
        self.factories.keys().copied().collect()
    }

    /// Check if a target kind is registered.
    pub fn has_kind(&self, kind: TargetKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in targets.
///
/// The health target is backed by [`MemoryHealthStore`](crate::health::MemoryHealthStore)
/// since no host store exists outside the platform; embedders replace that
/// factory with one bound to their store.
pub fn create_default_registry() -> TargetRegistry {
    let mut registry = TargetRegistry::new();

    registry.replace(
        TargetKind::Health,
        Box::new(|config| crate::health::create_health_target(config)),
    );

    registry.replace(
        TargetKind::Mqtt,
        Box::new(|config| crate::mqtt::create_mqtt_target(config)),
    );

    registry.replace(
        TargetKind::Fitness,
        Box::new(|config| crate::fitness::create_fitness_target(config)),
    );

    registry
}
