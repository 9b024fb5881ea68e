use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Phase of a synchronization pass
///
/// ```text
/// Idle → Extracting → Enriching → Merging ⇄ Loading → Committing → Idle
/// ```
///
/// Merging and Loading alternate once per id chunk so that at most one
/// chunk of rows is held at a time. Any failure returns to `Idle` without
/// passing through `Committing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    Extracting,
    Enriching,
    Merging,
    Loading,
    Committing,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassState::Idle => "idle",
            PassState::Extracting => "extracting",
            PassState::Enriching => "enriching",
            PassState::Merging => "merging",
            PassState::Loading => "loading",
            PassState::Committing => "committing",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(PassState::Idle),
            "extracting" => Ok(PassState::Extracting),
            "enriching" => Ok(PassState::Enriching),
            "merging" => Ok(PassState::Merging),
            "loading" => Ok(PassState::Loading),
            "committing" => Ok(PassState::Committing),
            _ => Err(OrchestratorError::parse(format!("Invalid pass state: {}", s))),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, PassState::Idle)
    }

    fn can_transition_to(&self, next: PassState) -> bool {
        use PassState::*;
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Enriching)
                | (Enriching, Merging)
                | (Merging, Loading)
                | (Loading, Merging)
                | (Merging, Committing)
                | (Loading, Committing)
                | (Committing, Idle)
        )
    }
}

impl std::fmt::Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pass state machine for transitions
#[derive(Debug)]
pub struct PassStateMachine {
    state: PassState,
    started_at: Option<DateTime<Utc>>,
    passes_completed: u64,
    passes_failed: u64,
}

impl Default for PassStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PassStateMachine {
    pub fn new() -> Self {
        Self {
            state: PassState::Idle,
            started_at: None,
            passes_completed: 0,
            passes_failed: 0,
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    pub fn passes_failed(&self) -> u64 {
        self.passes_failed
    }

    /// Transition: IDLE → EXTRACTING
    pub fn begin(&mut self) -> Result<()> {
        self.transition(PassState::Extracting)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn transition(&mut self, next: PassState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        debug!("Pass state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Transition: COMMITTING → IDLE, returns the pass duration in milliseconds
    pub fn complete(&mut self) -> Result<u64> {
        self.transition(PassState::Idle)?;
        self.passes_completed += 1;
        Ok(self.elapsed_ms())
    }

    /// Abort from any active state back to IDLE
    pub fn fail(&mut self) -> Result<u64> {
        if !self.state.is_active() {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: PassState::Idle.as_str().to_string(),
            });
        }
        debug!("Pass state {} -> idle (failed)", self.state);
        self.state = PassState::Idle;
        self.passes_failed += 1;
        Ok(self.elapsed_ms())
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map(|start| (Utc::now() - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}
