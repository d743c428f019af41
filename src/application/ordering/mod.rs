//! Ordering policies a node can be built with.

pub mod authority;
pub mod latency;

pub use authority::AuthorityOrdered;
pub use latency::{ConflictRule, LatencyBased};
