use crate::errors::AutomationError;
use serde::Serialize;
use std::fmt;

/// Recovery action the orchestrator should take for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorAction {
    /// Transient; go around the retry loop again.
    Retry,
    /// Give up on the current unit of work.
    Fail,
    /// The browser session is gone; tear it down and start a new one.
    Heal,
    /// Worth a log line, nothing else.
    LogOnly,
}

impl fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorAction::Retry => "RETRY",
            ErrorAction::Fail => "FAIL",
            ErrorAction::Heal => "HEAL",
            ErrorAction::LogOnly => "LOG_ONLY",
        };
        f.write_str(name)
    }
}

const UNREACHABLE_MARKERS: &[&str] = &[
    "unreachable",
    "not reachable",
    "connection refused",
    "connection reset",
    "connection is closed",
    "disconnected",
    "invalid session",
    "no such window",
    "target closed",
    "browser has closed",
    "broken pipe",
];

/// Whether a driver message describes a browser that cannot be reached.
pub fn indicates_unreachable(message: &str) -> bool {
    let lower = message.to_lowercase();
    UNREACHABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Map an error to a recovery action. Rules apply in priority order and
/// anything not recognised fails.
pub fn classify(error: &AutomationError) -> ErrorAction {
    match error {
        AutomationError::SessionLost(_) => ErrorAction::Heal,
        AutomationError::Driver(message) => {
            if indicates_unreachable(message) {
                ErrorAction::Heal
            } else {
                ErrorAction::Retry
            }
        }
        e if e.is_dom_transient() => ErrorAction::Retry,
        AutomationError::Authentication(_) => ErrorAction::Fail,
        AutomationError::DriftPersistence(_) => ErrorAction::LogOnly,
        _ => ErrorAction::Fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lost_heals() {
        let err = AutomationError::SessionLost("window already closed".to_string());
        assert_eq!(classify(&err), ErrorAction::Heal);
    }

    #[test]
    fn test_driver_errors_split_on_reachability() {
        let dead = AutomationError::Driver("chrome not reachable".to_string());
        assert_eq!(classify(&dead), ErrorAction::Heal);

        let refused = AutomationError::Driver("Connection refused (os error 111)".to_string());
        assert_eq!(classify(&refused), ErrorAction::Heal);

        let glitch = AutomationError::Driver("unknown error: cannot focus element".to_string());
        assert_eq!(classify(&glitch), ErrorAction::Retry);
    }

    #[test]
    fn test_dom_transients_retry() {
        for err in [
            AutomationError::StaleElement("node detached".to_string()),
            AutomationError::Timeout("spinner".to_string()),
            AutomationError::ElementNotFound("//button".to_string()),
            AutomationError::NotInteractable("covered".to_string()),
        ] {
            assert_eq!(classify(&err), ErrorAction::Retry, "{}", err);
        }
    }

    #[test]
    fn test_authentication_fails() {
        let err = AutomationError::Authentication("profile rejected".to_string());
        assert_eq!(classify(&err), ErrorAction::Fail);
    }

    #[test]
    fn test_unknown_and_domain_errors_fail() {
        let unknown = AutomationError::AnyhowError("something odd".to_string());
        assert_eq!(classify(&unknown), ErrorAction::Fail);

        let open = AutomationError::CircuitOpen("click".to_string());
        assert_eq!(classify(&open), ErrorAction::Fail);

        let config = AutomationError::Configuration("bad catalog".to_string());
        assert_eq!(classify(&config), ErrorAction::Fail);
    }

    #[test]
    fn test_drift_persistence_is_log_only() {
        let err = AutomationError::DriftPersistence("disk full".to_string());
        assert_eq!(classify(&err), ErrorAction::LogOnly);
    }
}
