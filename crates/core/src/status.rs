//! Node and plan execution status.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by node executions and plan executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet dispatched.
    Queued,
    /// Dispatched and executing.
    Running,
    /// Waiting on one or more external callbacks.
    AsyncWaiting,
    /// Waiting on a task handed to an external executor.
    TaskWaiting,
    /// Waiting on spawned child node executions.
    ChildWaiting,
    /// Waiting on a manual decision (mark failed, ignore or abort).
    InterventionWaiting,
    /// Abort or expiry in progress; descendants are being torn down.
    Discontinuing,
    /// Suspended by a pause interrupt.
    Paused,
    /// Transient hop between `Paused` and the status it was paused from.
    Resumed,
    /// Finished successfully.
    Succeeded,
    /// Finished with a step failure.
    Failed,
    /// Finished because of an unrecoverable error.
    Errored,
    /// Aborted by an interrupt.
    Aborted,
    /// Ran past its timeout.
    Expired,
    /// Not executed because of a skip condition.
    Skipped,
}

impl Status {
    /// Every terminal status.
    pub const TERMINAL: [Self; 6] = [
        Self::Succeeded,
        Self::Failed,
        Self::Errored,
        Self::Aborted,
        Self::Expired,
        Self::Skipped,
    ];

    /// Returns `true` once no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Errored
                | Self::Aborted
                | Self::Expired
                | Self::Skipped
        )
    }

    /// Returns `true` for the statuses that wait on something external.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::AsyncWaiting | Self::TaskWaiting | Self::ChildWaiting | Self::InterventionWaiting
        )
    }

    /// Returns `true` if a pause interrupt can suspend a node in this status.
    #[must_use]
    pub fn is_pausable(&self) -> bool {
        matches!(
            self,
            Self::Queued
                | Self::Running
                | Self::AsyncWaiting
                | Self::TaskWaiting
                | Self::ChildWaiting
                | Self::InterventionWaiting
        )
    }

    /// Returns `true` for terminal statuses that count as a failure.
    #[must_use]
    pub fn is_broke(&self) -> bool {
        matches!(self, Self::Failed | Self::Errored | Self::Expired)
    }

    /// Returns `true` for terminal statuses that let a pipeline move on.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Snake-case name, identical to the serde representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::AsyncWaiting => "async_waiting",
            Self::TaskWaiting => "task_waiting",
            Self::ChildWaiting => "child_waiting",
            Self::InterventionWaiting => "intervention_waiting",
            Self::Discontinuing => "discontinuing",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
            Self::Expired => "expired",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Status::Succeeded, true)]
    #[case(Status::Failed, true)]
    #[case(Status::Errored, true)]
    #[case(Status::Aborted, true)]
    #[case(Status::Expired, true)]
    #[case(Status::Skipped, true)]
    #[case(Status::Queued, false)]
    #[case(Status::Running, false)]
    #[case(Status::AsyncWaiting, false)]
    #[case(Status::Discontinuing, false)]
    #[case(Status::Paused, false)]
    #[case(Status::Resumed, false)]
    fn terminal_states(#[case] status: Status, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn terminal_constant_matches_predicate() {
        for status in Status::TERMINAL {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn waiting_states() {
        assert!(Status::AsyncWaiting.is_waiting());
        assert!(Status::TaskWaiting.is_waiting());
        assert!(Status::ChildWaiting.is_waiting());
        assert!(Status::InterventionWaiting.is_waiting());
        assert!(!Status::Running.is_waiting());
        assert!(!Status::Paused.is_waiting());
    }

    #[test]
    fn pausable_states_exclude_paused_and_terminal() {
        assert!(Status::Running.is_pausable());
        assert!(Status::Queued.is_pausable());
        assert!(!Status::Paused.is_pausable());
        assert!(!Status::Discontinuing.is_pausable());
        assert!(!Status::Succeeded.is_pausable());
    }

    #[test]
    fn broke_and_positive_are_disjoint() {
        for status in Status::TERMINAL {
            assert!(!(status.is_broke() && status.is_positive()));
        }
        assert!(Status::Expired.is_broke());
        assert!(Status::Skipped.is_positive());
        assert!(!Status::Aborted.is_broke());
        assert!(!Status::Aborted.is_positive());
    }

    #[test]
    fn display_matches_serde() {
        for status in [Status::AsyncWaiting, Status::Succeeded, Status::InterventionWaiting] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
