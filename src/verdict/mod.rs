//! Verdict classification
//!
//! Derives verdicts as pure functions over the evidence the launcher collected.

pub mod classifier;
