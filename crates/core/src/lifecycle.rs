//! Instance lifecycle state machine.
//!
//! [`next_status`] is the single source of truth for which control actions
//! are legal in which state. It is a pure function; the atomicity of the
//! actual status read-modify-write is enforced in the repository layer via
//! a compare-and-swap UPDATE.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// InstanceStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a messaging-gateway instance.
///
/// `status == Running` is the gate for sending messages. `Error` is not
/// terminal; `start` recovers from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Creating,
    Stopped,
    Starting,
    Running,
    Error,
}

impl InstanceStatus {
    /// Stable database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Creating => "creating",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(InstanceStatus::Creating),
            "stopped" => Ok(InstanceStatus::Stopped),
            "starting" => Ok(InstanceStatus::Starting),
            "running" => Ok(InstanceStatus::Running),
            "error" => Ok(InstanceStatus::Error),
            other => Err(format!("Unknown instance status: {other}")),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ControlAction
// ---------------------------------------------------------------------------

/// A lifecycle control request issued by the instance owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// Legality violations for lifecycle transitions. Surfaced synchronously to
/// the caller, never retried.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The instance is already in (or already heading to) the requested
    /// state.
    #[error("Instance is already {status}")]
    AlreadyInRequestedState { status: InstanceStatus },

    /// A transition is in flight (or the instance is still provisioning)
    /// and the action cannot be applied to the current state.
    #[error("Cannot apply action while instance is {status}")]
    TransitionInProgress { status: InstanceStatus },
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Compute the status a control action drives the instance to, or reject
/// the action as illegal in the current state.
///
/// Rules:
///
/// | action    | legal from          | result     |
/// |-----------|---------------------|------------|
/// | `start`   | stopped, error      | `starting` |
/// | `stop`    | running, starting   | `stopped`  |
/// | `restart` | any                 | `starting` |
///
/// `start` never produces `running` directly; the `starting -> running`
/// edge is driven by the network connector reporting a successful
/// handshake.
pub fn next_status(
    current: InstanceStatus,
    action: ControlAction,
) -> Result<InstanceStatus, LifecycleError> {
    use InstanceStatus::*;

    match action {
        ControlAction::Start => match current {
            Stopped | Error => Ok(Starting),
            Running => Err(LifecycleError::AlreadyInRequestedState { status: current }),
            Creating | Starting => Err(LifecycleError::TransitionInProgress { status: current }),
        },
        ControlAction::Stop => match current {
            Running | Starting => Ok(Stopped),
            Stopped => Err(LifecycleError::AlreadyInRequestedState { status: current }),
            Creating | Error => Err(LifecycleError::TransitionInProgress { status: current }),
        },
        // Restart is stop-then-start collapsed into one step; legal from
        // anywhere.
        ControlAction::Restart => Ok(Starting),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
