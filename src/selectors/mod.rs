pub mod catalog;
pub mod drift;
pub mod engine;

pub use catalog::{LocatorCatalog, LocatorSet};
pub use drift::{DriftEntry, DriftOutcome, DriftStats};
pub use engine::{Resolved, SelectorEngine};
