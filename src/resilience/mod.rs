pub mod circuit;
pub mod classify;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitState};
pub use classify::{classify, ErrorAction};
pub use retry::RetryPolicy;
