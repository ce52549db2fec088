//! Enable/permission gate checked before any target I/O.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use scalesync_common::{SyncFailure, SyncResult};

/// Authorization state of a target as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Shared switch deciding whether a target may run operations.
///
/// Toggling is lock-free so the orchestrator can disable a target while an
/// operation on it is still running; the next operation observes the change.
#[derive(Debug)]
pub struct TargetControl {
    enabled: AtomicBool,
    permitted: AtomicBool,
}

impl TargetControl {
    /// Create a gate with permission granted.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            permitted: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn permission(&self) -> PermissionState {
        if self.permitted.load(Ordering::SeqCst) {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }

    pub fn set_permission(&self, state: PermissionState) {
        self.permitted
            .store(state == PermissionState::Granted, Ordering::SeqCst);
    }

    /// Fail with `PermissionDenied` unless the target is enabled and permitted.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_enabled() && self.permission() == PermissionState::Granted {
            Ok(())
        } else {
            Err(SyncFailure::permission_denied())
        }
    }
}

impl Default for TargetControl {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesync_common::ErrorKind;

    #[test]
    fn test_disabled_is_denied() {
        let control = TargetControl::new(false);
        let err = control.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_permission_revoked_is_denied() {
        let control = TargetControl::new(true);
        assert!(control.check().is_ok());

        control.set_permission(PermissionState::Denied);
        assert_eq!(control.check().unwrap_err().kind(), ErrorKind::PermissionDenied);

        control.set_permission(PermissionState::Granted);
        assert!(control.check().is_ok());
    }
}
