//! Registry keys for advisers, facilitators and timeout trackers.
//!
//! Keys are open-ended: the built-in names are associated constants and
//! callers can register their own with `new`.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! type_key {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $konst:ident = $value:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            $(
                $(#[$cmeta])*
                pub const $konst: Self = Self(Cow::Borrowed($value));
            )*

            /// Creates a custom key.
            pub fn new(name: impl Into<String>) -> Self {
                Self(Cow::Owned(name.into()))
            }

            /// Key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }
    };
}

type_key!(
    /// Identifies an adviser implementation.
    AdviserType {
        /// Advance when the step succeeded.
        ON_SUCCESS = "ON_SUCCESS",
        /// Advance on any positive status.
        NEXT_STEP = "NEXT_STEP",
        /// Advance to a recovery node when the step failed.
        ON_FAIL = "ON_FAIL",
        /// Treat a failure as success and advance.
        IGNORE = "IGNORE",
        /// Re-run the node.
        RETRY = "RETRY",
        /// Wait for a manual decision.
        MANUAL_INTERVENTION = "MANUAL_INTERVENTION",
        /// Abort the whole plan.
        ABORT = "ABORT",
        /// Pause the node.
        PAUSE = "PAUSE",
        /// Resume the plan.
        RESUME = "RESUME",
    }
);

type_key!(
    /// Identifies a facilitator implementation.
    FacilitatorType {
        /// Run the step inline.
        SYNC = "SYNC",
        /// Wait for callbacks.
        ASYNC = "ASYNC",
        /// Hand a task to an external executor.
        TASK = "TASK",
        /// Sequence of external tasks.
        TASK_CHAIN = "TASK_CHAIN",
        /// Spawn one child node.
        CHILD = "CHILD",
        /// Spawn several child nodes.
        CHILDREN = "CHILDREN",
        /// Run child nodes one after another.
        CHILD_CHAIN = "CHILD_CHAIN",
    }
);

type_key!(
    /// Identifies a timeout tracker implementation.
    TimeoutTrackerType {
        /// Wall-clock deadline that keeps ticking while paused.
        ABSOLUTE = "ABSOLUTE",
        /// Budget that only counts time spent not paused.
        ACTIVE = "ACTIVE",
    }
);
