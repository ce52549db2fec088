//! Per-target connection and sync status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle of a target.
///
/// `Disabled → Connecting → Connected → Disconnected → Connecting`; any
/// state moves to `Disabled` when the target is switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disabled,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disabled => "disabled",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Snapshot of one target as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    /// Configured target name.
    pub name: String,
    /// Whether operations are dispatched to the target.
    pub enabled: bool,
    /// Current connection state.
    pub connection: ConnectionState,
    /// End of the last fully successful operation.
    pub last_sync: Option<DateTime<Utc>>,
    /// User-facing message of the last failure, cleared on success.
    pub last_error: Option<String>,
}

impl TargetState {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            connection: if enabled {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Disabled
            },
            last_sync: None,
            last_error: None,
        }
    }

    /// Switch the target on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.connection = if enabled {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Disabled
        };
    }

    /// Move to a new connection state unless the target is disabled.
    pub fn transition(&mut self, next: ConnectionState) {
        if self.enabled {
            self.connection = next;
        }
    }

    /// Record a fully successful operation.
    pub fn mark_success(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
        self.last_error = None;
    }

    /// Record a session established without syncing any data.
    pub fn mark_connected(&mut self) {
        self.last_error = None;
        self.transition(ConnectionState::Connected);
    }

    /// Record a failed operation.
    pub fn mark_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }
}
