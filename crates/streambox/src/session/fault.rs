//! Fault taxonomy and the recovery policy applied to engine errors.

use crate::engine::{EngineError, ErrorDetails, ErrorKind};

use super::state::{FailureReason, RetryCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The watchdog expired while still buffering.
    Timeout,
    /// The manifest itself could not be fetched. Never retried.
    ManifestLoadFailure,
    /// Any other fatal network error. Retried through a reload.
    TransientNetworkFailure,
    /// Fatal media error. Recovered through a decoder reset.
    MediaDecodeFault,
    UnrecoverableFault,
    /// A sink playing a direct source reported an error.
    NativeSinkFailure,
}

impl Fault {
    /// Map an engine error to a fault. Non-fatal errors are left to the
    /// engine and yield `None`.
    pub fn from_engine_error(error: &EngineError) -> Option<Self> {
        if !error.fatal {
            return None;
        }
        let fault = match (error.kind, error.details) {
            (ErrorKind::Network, ErrorDetails::ManifestLoadError) => Self::ManifestLoadFailure,
            (ErrorKind::Network, _) => Self::TransientNetworkFailure,
            (ErrorKind::Media, _) => Self::MediaDecodeFault,
            _ => Self::UnrecoverableFault,
        };
        Some(fault)
    }

    /// Whether this fault reaches the viewer rather than being handled
    /// internally.
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ManifestLoadFailure
                | Self::UnrecoverableFault
                | Self::NativeSinkFailure
        )
    }
}

/// What the controller must do in response to a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Call the engine's reload primitive.
    Reload,
    /// Call the engine's decoder recovery primitive.
    RecoverMedia,
    /// Move to a terminal status, destroying the engine when `teardown` is set.
    Surface {
        reason: FailureReason,
        teardown: bool,
    },
}

impl RecoveryAction {
    /// The status reached by a surfaced action.
    pub fn status(&self) -> Option<super::SessionStatus> {
        match self {
            Self::Surface {
                reason: FailureReason::Timeout,
                ..
            } => Some(super::SessionStatus::TimedOut),
            Self::Surface { reason, .. } => Some(super::SessionStatus::Error(*reason)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaultClassifier {
    media_recovery_limit: Option<u32>,
}

impl FaultClassifier {
    pub fn new(media_recovery_limit: Option<u32>) -> Self {
        Self {
            media_recovery_limit,
        }
    }

    /// Decide the action for `fault`, recording automatic recoveries in
    /// `counts`.
    pub fn on_fault(&self, fault: Fault, counts: &mut RetryCounts) -> RecoveryAction {
        match fault {
            Fault::Timeout => RecoveryAction::Surface {
                reason: FailureReason::Timeout,
                teardown: false,
            },
            Fault::ManifestLoadFailure => RecoveryAction::Surface {
                reason: FailureReason::ConnectionRefused,
                teardown: false,
            },
            Fault::TransientNetworkFailure => {
                counts.network = counts.network.saturating_add(1);
                RecoveryAction::Reload
            }
            Fault::MediaDecodeFault => {
                if self
                    .media_recovery_limit
                    .is_some_and(|limit| counts.media >= limit)
                {
                    return self.on_fault(Fault::UnrecoverableFault, counts);
                }
                counts.media = counts.media.saturating_add(1);
                RecoveryAction::RecoverMedia
            }
            Fault::UnrecoverableFault => RecoveryAction::Surface {
                reason: FailureReason::StreamUnavailable,
                teardown: true,
            },
            Fault::NativeSinkFailure => RecoveryAction::Surface {
                reason: FailureReason::NativePlayback,
                teardown: false,
            },
        }
    }
}
