//! Execution control
//!
//! Orchestrates kernel primitives into one supervised run with type-state
//! enforcement of the child setup order.

pub mod launcher;
pub mod preexec;
pub mod report;
