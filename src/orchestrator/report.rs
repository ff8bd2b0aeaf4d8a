//! Run and teardown reports

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::outputs::Output;
use crate::resource::{HandleSnapshot, ResourceKind};
use crate::{Error, Result};

/// Lifecycle of an orchestrator run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run started yet
    #[default]
    Idle,
    /// A run is in progress
    Running,
    /// Every kind in the graph reached Active
    Completed,
    /// A step failed, or the run was cancelled or timed out
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "Idle",
            RunState::Running => "Running",
            RunState::Completed => "Completed",
            RunState::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// A kind whose step or deletion failed
#[derive(Debug)]
pub struct StepFailure {
    /// Kind of the failed step
    pub kind: ResourceKind,
    /// The error that ended it
    pub error: Error,
}

/// Outcome of a run
#[derive(Debug)]
pub struct RunReport {
    /// Completed or Aborted
    pub state: RunState,
    /// Kinds that reached Active during this run, in completion order
    pub completed: Vec<ResourceKind>,
    /// Kinds taken from a checkpoint without executing
    pub resumed: Vec<ResourceKind>,
    /// Kinds whose step failed
    pub failed: Vec<StepFailure>,
    /// Kinds in flight when the run was cancelled or hit its deadline
    pub interrupted: Vec<ResourceKind>,
    /// Kinds never scheduled
    pub never_attempted: Vec<ResourceKind>,
    /// Why the run stopped early, when it was cancelled or timed out
    pub interruption: Option<String>,
    /// Every Active handle, resumed ones included
    pub handles: HandleSnapshot,
    /// Exported values for the Active handles
    pub outputs: Vec<Output>,
    pub(crate) stack_name: String,
}

impl RunReport {
    /// Whether every kind reached Active
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Checkpoint holding the Active handles, for a later resume
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            stack_name: self.stack_name.clone(),
            handles: self
                .handles
                .iter()
                .filter(|(_, h)| h.is_active())
                .map(|(k, h)| (*k, h.clone()))
                .collect(),
        }
    }

    /// Outputs of a completed run, or the error that ended it
    pub fn into_outputs(mut self) -> Result<Vec<Output>> {
        if self.is_completed() {
            return Ok(self.outputs);
        }
        if !self.failed.is_empty() {
            return Err(self.failed.swap_remove(0).error);
        }
        Err(Error::Cancelled(
            self.interruption
                .unwrap_or_else(|| "run stopped before every step completed".to_string()),
        ))
    }
}

/// Active handles saved from a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stack the handles belong to
    pub stack_name: String,
    /// Active handles by kind
    pub handles: HandleSnapshot,
}

impl Checkpoint {
    /// Serialize as JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Outcome of a teardown
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Kinds deleted, in deletion order
    pub deleted: Vec<ResourceKind>,
    /// Kinds whose deletion failed
    pub failed: Vec<StepFailure>,
    /// Kinds left in place: nothing separate to delete, or a dependent
    /// still exists
    pub skipped: Vec<ResourceKind>,
}

impl TeardownReport {
    /// Whether every recorded resource is gone
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
