//! Launcher privilege check.

use crate::config::types::{EngineError, Result};
use nix::unistd::geteuid;

/// Proof that the launcher held effective uid 0 when the run started.
///
/// Checked once per run in the parent and handed to the child bootstrap, so
/// the privilege drop never re-queries ambient state mid-setup.
#[derive(Debug)]
pub struct PrivilegedLauncher {
    _private: (),
}

impl PrivilegedLauncher {
    pub fn verify() -> Result<Self> {
        let euid = geteuid();
        if !euid.is_root() {
            return Err(EngineError::PrivilegedIdentityRequired {
                euid: euid.as_raw(),
            });
        }
        Ok(Self { _private: () })
    }

    #[cfg(test)]
    pub(crate) fn assume_for_tests() -> Self {
        Self { _private: () }
    }
}
