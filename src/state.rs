use crate::types::PortalState;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Mutable record of one automation session: cached navigation position,
/// run context used for log correlation, and health bookkeeping.
///
/// The cache is only touched through [`invalidate_cache`](Self::invalidate_cache)
/// and [`update_cache`](Self::update_cache) so the validity flag always
/// matches the cached value.
#[derive(Debug, Clone)]
pub struct SessionState {
    cached_state: Option<PortalState>,
    cache_timestamp: Option<Instant>,
    cache_valid: bool,
    pub run_id: String,
    pub current_patient: Option<String>,
    pub current_stage: Option<String>,
    pub is_headless: bool,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(run_id: impl Into<String>, is_headless: bool) -> Self {
        Self {
            cached_state: None,
            cache_timestamp: None,
            cache_valid: false,
            run_id: run_id.into(),
            current_patient: None,
            current_stage: None,
            is_headless,
            last_health_check: None,
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache_valid = false;
        self.cached_state = None;
        self.cache_timestamp = None;
    }

    pub fn update_cache(&mut self, state: PortalState) {
        self.cached_state = Some(state);
        self.cache_timestamp = Some(Instant::now());
        self.cache_valid = true;
    }

    pub fn is_cache_valid(&self) -> bool {
        self.cache_valid
    }

    /// Cached state if valid and younger than `ttl`.
    pub fn cached_state(&self, ttl: Duration) -> Option<PortalState> {
        if !self.cache_valid {
            return None;
        }
        match (self.cached_state, self.cache_timestamp) {
            (Some(state), Some(at)) if at.elapsed() <= ttl => Some(state),
            _ => None,
        }
    }

    pub fn set_context(&mut self, patient: Option<String>, stage: Option<String>) {
        self.current_patient = patient;
        self.current_stage = stage;
    }

    pub fn mark_health_check(&mut self) {
        self.last_health_check = Some(Utc::now());
    }

    /// Span carrying the run context; entered around every session operation.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "session",
            run = %self.run_id,
            patient = self.current_patient.as_deref().unwrap_or("-"),
            stage = self.current_stage.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopping,
    Completed,
    Error,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "IDLE",
            RunState::Running => "RUNNING",
            RunState::Paused => "PAUSED",
            RunState::Stopping => "STOPPING",
            RunState::Completed => "COMPLETED",
            RunState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Shared run state. The orchestrator checks [`should_continue`](Self::should_continue)
/// between patients; the GUI drives pause, resume and stop.
#[derive(Debug)]
pub struct RunControl {
    state: RwLock<RunState>,
    last_error: RwLock<Option<String>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RunState::Idle),
            last_error: RwLock::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// IDLE, COMPLETED or ERROR → RUNNING.
    pub fn start(&self) -> bool {
        let started = self.transition(
            |s| matches!(s, RunState::Idle | RunState::Completed | RunState::Error),
            RunState::Running,
        );
        if started {
            *self.last_error.write() = None;
        }
        started
    }

    pub fn pause(&self) -> bool {
        self.transition(|s| s == RunState::Running, RunState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(|s| s == RunState::Paused, RunState::Running)
    }

    pub fn request_stop(&self) -> bool {
        self.transition(
            |s| matches!(s, RunState::Running | RunState::Paused),
            RunState::Stopping,
        )
    }

    /// RUNNING or STOPPING → COMPLETED.
    pub fn complete(&self) -> bool {
        self.transition(
            |s| matches!(s, RunState::Running | RunState::Stopping),
            RunState::Completed,
        )
    }

    /// Any active state → ERROR.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let failed = self.transition(
            |s| matches!(s, RunState::Running | RunState::Paused | RunState::Stopping),
            RunState::Error,
        );
        if failed {
            warn!("Run marked as failed: {}", reason);
            *self.last_error.write() = Some(reason);
        }
        failed
    }

    /// Whether the patient loop may start its next step.
    pub fn should_continue(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    fn transition(&self, allowed: impl Fn(RunState) -> bool, to: RunState) -> bool {
        let mut state = self.state.write();
        if allowed(*state) {
            info!("Run state {} -> {}", *state, to);
            *state = to;
            true
        } else {
            warn!("Ignoring run state change {} -> {}", *state, to);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cache_invalidation_clears_value() {
        let mut state = SessionState::new("run-1", true);
        state.update_cache(PortalState::Home);
        assert!(state.is_cache_valid());
        assert_eq!(state.cached_state(Duration::from_secs(5)), Some(PortalState::Home));

        state.invalidate_cache();
        assert!(!state.is_cache_valid());
        assert_eq!(state.cached_state(Duration::from_secs(5)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let mut state = SessionState::new("run-1", true);
        state.update_cache(PortalState::Search);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(state.cached_state(Duration::from_secs(5)), None);
        assert!(state.is_cache_valid());
    }

    #[test]
    fn test_run_lifecycle() {
        let control = RunControl::new();
        assert_eq!(control.state(), RunState::Idle);
        assert!(!control.pause());

        assert!(control.start());
        assert!(control.should_continue());
        assert!(control.pause());
        assert!(control.is_paused());
        assert!(!control.should_continue());
        assert!(control.resume());
        assert!(control.request_stop());
        assert_eq!(control.state(), RunState::Stopping);
        assert!(control.complete());
        assert_eq!(control.state(), RunState::Completed);
    }

    #[test]
    fn test_fail_records_reason_and_restart_clears_it() {
        let control = RunControl::new();
        assert!(!control.fail("not running yet"));
        control.start();
        assert!(control.fail("browser unrecoverable"));
        assert_eq!(control.state(), RunState::Error);
        assert_eq!(control.last_error().as_deref(), Some("browser unrecoverable"));

        assert!(control.start());
        assert_eq!(control.last_error(), None);
    }
}
