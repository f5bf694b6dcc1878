// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No child, nothing to do.
    Stopped,
    /// About to spawn the child.
    Starting,
    /// Child process is alive.
    Running,
    /// Child failed; a new spawn follows.
    RestartPending,
    /// Giving up; the cause is about to be reported.
    Aborting,
    /// Terminal. The run loop has returned an error.
    Aborted,
}

impl SupervisorState {
    pub fn is_alive(self) -> bool {
        self == SupervisorState::Running
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SupervisorState::Stopped | SupervisorState::Aborted)
    }

    pub(crate) fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, RestartPending)
                | (Starting, Aborting)
                | (Running, Stopped)
                | (Running, RestartPending)
                | (Running, Aborting)
                | (RestartPending, Starting)
                | (Aborting, Aborted)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Stopped => write!(f, "stopped"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::RestartPending => write!(f, "restart-pending"),
            SupervisorState::Aborting => write!(f, "aborting"),
            SupervisorState::Aborted => write!(f, "aborted"),
        }
    }
}
