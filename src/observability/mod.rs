//! Observability
//!
//! Per-run diagnostic records on top of the `log` facade.

pub mod diagnostics;
