pub mod actions;
#[cfg(feature = "chrome")]
pub mod chrome;
pub mod navigation;
pub mod session;

#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromeElement};
pub use navigation::keys;
pub use session::AutomationSession;
