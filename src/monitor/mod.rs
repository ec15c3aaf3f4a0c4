//! Runtime supervision of the sandboxed child.

pub mod watchdog;
