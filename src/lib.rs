pub mod browser;
pub mod core;
pub mod errors;
pub mod logging;
pub mod resilience;
pub mod selectors;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod wait;

pub use browser::AutomationSession;
#[cfg(feature = "chrome")]
pub use browser::ChromeBrowser;
pub use core::{BrowserTrait, Config, SessionTrait};
pub use errors::{AutomationError, Result};
pub use resilience::{classify, CircuitBreaker, ErrorAction, RetryPolicy};
pub use selectors::{LocatorCatalog, LocatorSet, SelectorEngine};
pub use state::{RunControl, RunState, SessionState};
pub use types::*;
pub use wait::{SmartWait, WaitProfile, WaitProfiles};
