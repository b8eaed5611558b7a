//! Machine pool deployment strategies
//!
//! Decides which scale set instances to delete on each pass so a pool
//! converges on its desired size and latest model without exceeding its
//! disruption budget.

#![deny(missing_docs)]

pub mod intstr;
pub mod rolling;

pub use rolling::{RollingUpdateStrategy, DEFAULT_MAX_SURGE, DEFAULT_MAX_UNAVAILABLE};
