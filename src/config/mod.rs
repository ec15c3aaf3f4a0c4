//! Configuration
//!
//! Run configuration types, JSON loading, and structural validation.

pub mod loader;
pub mod types;
pub mod validator;
