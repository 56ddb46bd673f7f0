use serde::{Deserialize, Serialize};
use std::fmt;

/// What an element has to satisfy before a lookup counts as resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCondition {
    /// Attached to the DOM.
    Presence,
    /// Attached and rendered with a non-empty box.
    Visible,
    /// Visible and not disabled.
    Clickable,
}

impl fmt::Display for ElementCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementCondition::Presence => "presence",
            ElementCondition::Visible => "visible",
            ElementCondition::Clickable => "clickable",
        };
        f.write_str(name)
    }
}

/// Logical page of the portal, derived from URL patterns and DOM landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortalState {
    Unknown,
    Login,
    Home,
    Search,
    CaseDetail,
}

impl fmt::Display for PortalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortalState::Unknown => "UNKNOWN",
            PortalState::Login => "LOGIN",
            PortalState::Home => "HOME",
            PortalState::Search => "SEARCH",
            PortalState::CaseDetail => "CASE_DETAIL",
        };
        f.write_str(name)
    }
}

/// Knobs for a single click.
#[derive(Debug, Clone, Copy)]
pub struct ClickOptions<'a> {
    pub scroll_first: bool,
    pub wait_spinner_after: bool,
    /// Wait profile that supplies the element lookup timeout.
    pub wait_profile: &'a str,
    /// Wait profile describing the spinner checked before and after the click.
    pub spinner_profile: &'a str,
}

impl Default for ClickOptions<'static> {
    fn default() -> Self {
        Self {
            scroll_first: true,
            wait_spinner_after: true,
            wait_profile: "default",
            spinner_profile: "spinner",
        }
    }
}

impl<'a> ClickOptions<'a> {
    pub fn with_wait_profile(mut self, profile: &'a str) -> Self {
        self.wait_profile = profile;
        self
    }

    pub fn with_spinner_profile(mut self, profile: &'a str) -> Self {
        self.spinner_profile = profile;
        self
    }

    pub fn without_scroll(mut self) -> Self {
        self.scroll_first = false;
        self
    }

    pub fn without_spinner_after(mut self) -> Self {
        self.wait_spinner_after = false;
        self
    }
}
