//! Entity Status State Machine
//!
//! Enforces valid status transitions for the handler lifecycle:
//!
//! ```text
//! UNINITIALIZED → INITIALIZING → ONLINE | OFFLINE | UNKNOWN
//!                              ↘ UNINITIALIZED (error detail)
//!
//! ONLINE ↔ OFFLINE ↔ UNKNOWN
//!
//! INITIALIZING/ONLINE/OFFLINE/UNKNOWN → UNINITIALIZING → UNINITIALIZED
//! UNINITIALIZED (HANDLER_TIMEOUT) → ONLINE | OFFLINE | UNKNOWN (late completion)
//! any → UNINITIALIZED | OFFLINE with an error detail
//! ```

use crate::status::{EntityStatus, StatusDetail, StatusInfo};
use thiserror::Error;

/// Error when an invalid status transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid status transition from {from} to {to}/{detail}: {reason}")]
pub struct InvalidTransition {
    pub from: EntityStatus,
    pub to: EntityStatus,
    pub detail: StatusDetail,
    pub reason: &'static str,
}

impl StatusInfo {
    /// Attempt a transition to a new status.
    ///
    /// Returns the new status if valid, or an error describing why the
    /// transition is invalid.
    pub fn try_transition(&self, to: StatusInfo) -> Result<StatusInfo, InvalidTransition> {
        use EntityStatus::*;

        let valid = match (self.status, to.status) {
            // Detail-only changes while nothing runs
            (Uninitialized, Uninitialized) => true,

            (Uninitialized, Initializing) => true,

            // A handler that timed out may still finish
            (Uninitialized, Online | Unknown) => self.detail == StatusDetail::HandlerTimeout,
            (Uninitialized, Offline) => {
                self.detail == StatusDetail::HandlerTimeout || to.detail.is_specified()
            }

            (Initializing, Online | Offline | Unknown) => true,
            (Online | Offline | Unknown, Online | Offline | Unknown) => true,

            // Disposal may start from any state that can hold a handler
            (Uninitialized | Initializing | Online | Offline | Unknown, Uninitializing) => true,
            (Uninitializing, Uninitialized) => true,

            // Failures
            (_, Uninitialized) => to.detail.is_specified(),
            (_, Offline) => to.detail.is_specified(),

            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self.status,
                to: to.status,
                detail: to.detail,
                reason: Self::transition_error_reason(self.status, to.status),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(&self, to: &StatusInfo) -> bool {
        self.try_transition(to.clone()).is_ok()
    }

    fn transition_error_reason(from: EntityStatus, to: EntityStatus) -> &'static str {
        use EntityStatus::*;

        match (from, to) {
            (Uninitialized, Online | Offline | Unknown) => {
                "No handler is initializing - must go through INITIALIZING"
            }
            (Online | Offline | Unknown | Initializing, Uninitialized) => {
                "Handler is active - must go through UNINITIALIZING or carry an error detail"
            }
            (Uninitializing, Online | Unknown | Initializing) => {
                "Handler is being disposed - cannot become active again"
            }
            (Online | Offline | Unknown, Initializing) => {
                "Handler already running - dispose first before re-initializing"
            }
            (Uninitializing, Uninitializing) => "Disposal already in progress",
            _ => "Invalid status transition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StatusDetail::{
        BridgeOffline, CommunicationError, HandlerConfigurationPending, HandlerInitializingError,
        HandlerMissingError, HandlerTimeout,
    };

    fn info(status: EntityStatus, detail: StatusDetail) -> StatusInfo {
        StatusInfo::new(status, detail)
    }

    // ==================== Valid Transitions ====================

    #[test]
    fn test_uninitialized_to_initializing() {
        let from = StatusInfo::default();
        assert!(from.can_transition_to(&StatusInfo::initializing()));
        assert_eq!(
            from.try_transition(StatusInfo::initializing()),
            Ok(StatusInfo::initializing())
        );
    }

    #[test]
    fn test_uninitialized_detail_change() {
        let from = StatusInfo::uninitialized(HandlerMissingError);
        assert!(from.can_transition_to(&StatusInfo::uninitialized(StatusDetail::None)));
        assert!(from.can_transition_to(&StatusInfo::uninitialized(HandlerConfigurationPending)));
    }

    #[test]
    fn test_initializing_to_running() {
        let from = StatusInfo::initializing();
        assert!(from.can_transition_to(&StatusInfo::online()));
        assert!(from.can_transition_to(&StatusInfo::offline(CommunicationError)));
        assert!(from.can_transition_to(&StatusInfo::unknown()));
    }

    #[test]
    fn test_running_states_interchange() {
        let online = StatusInfo::online();
        let offline = StatusInfo::offline(BridgeOffline);
        let unknown = StatusInfo::unknown();
        assert!(online.can_transition_to(&offline));
        assert!(offline.can_transition_to(&unknown));
        assert!(unknown.can_transition_to(&online));
    }

    #[test]
    fn test_disposal_path() {
        assert!(StatusInfo::online().can_transition_to(&StatusInfo::uninitializing()));
        assert!(StatusInfo::initializing().can_transition_to(&StatusInfo::uninitializing()));
        assert!(StatusInfo::uninitializing().can_transition_to(&StatusInfo::uninitialized(StatusDetail::None)));
    }

    #[test]
    fn test_failure_from_any_state() {
        let failed = StatusInfo::uninitialized(HandlerInitializingError);
        assert!(StatusInfo::initializing().can_transition_to(&failed));
        assert!(StatusInfo::online().can_transition_to(&failed));
        assert!(StatusInfo::uninitializing().can_transition_to(&failed));
    }

    #[test]
    fn test_late_completion_after_timeout() {
        let timed_out = StatusInfo::uninitialized(HandlerTimeout);
        assert!(timed_out.can_transition_to(&StatusInfo::online()));
        assert!(timed_out.can_transition_to(&StatusInfo::unknown()));
    }

    // ==================== Invalid Transitions ====================

    #[test]
    fn test_uninitialized_cannot_jump_to_online() {
        let result = StatusInfo::default().try_transition(StatusInfo::online());
        let err = result.unwrap_err();
        assert_eq!(err.from, EntityStatus::Uninitialized);
        assert_eq!(err.to, EntityStatus::Online);
        assert!(err.reason.contains("INITIALIZING"));
    }

    #[test]
    fn test_running_cannot_drop_to_uninitialized_without_detail() {
        assert!(!StatusInfo::online().can_transition_to(&StatusInfo::uninitialized(StatusDetail::None)));
        assert!(!StatusInfo::initializing().can_transition_to(&StatusInfo::uninitialized(StatusDetail::None)));
    }

    #[test]
    fn test_uninitializing_cannot_come_back() {
        let from = StatusInfo::uninitializing();
        assert!(!from.can_transition_to(&StatusInfo::online()));
        assert!(!from.can_transition_to(&StatusInfo::initializing()));
        assert!(!from.can_transition_to(&StatusInfo::uninitializing()));
    }

    #[test]
    fn test_running_cannot_reinitialize() {
        assert!(!StatusInfo::online().can_transition_to(&StatusInfo::initializing()));
    }

    #[test]
    fn test_error_message() {
        let err = info(EntityStatus::Uninitializing, StatusDetail::None)
            .try_transition(StatusInfo::online())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid status transition from UNINITIALIZING to ONLINE/NONE: \
             Handler is being disposed - cannot become active again"
        );
    }
}
