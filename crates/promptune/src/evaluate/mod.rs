//! Metrics and the error-absorbing evaluation wrapper.
//!
//! Metrics are first-class callables, not a DSL: [`ExactMatch`] and
//! [`PartialCredit`] cover the common cases, and anything implementing
//! [`Metric`] plugs in the same way. The engine only ever scores through
//! [`SafeMetric`], so a buggy user metric degrades to `0.0` instead of
//! aborting a compile.

pub mod metric;

pub use metric::*;
