pub mod profiles;
pub mod smart_wait;

pub use profiles::{WaitProfile, WaitProfiles, DEFAULT_PROFILE};
pub use smart_wait::SmartWait;
