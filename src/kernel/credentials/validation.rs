//! Credential validation logic.

use crate::config::types::{EngineError, Result};

/// Reject root UIDs/GIDs (0) as the target identity unless explicitly allowed.
pub fn validate_identity(uid: u32, gid: u32, allow_privileged: bool) -> Result<()> {
    if (uid == 0 || gid == 0) && !allow_privileged {
        return Err(EngineError::InvalidConfig(format!(
            "Cannot run as root UID/GID (uid={}, gid={}) without allow_privileged_identity",
            uid, gid
        )));
    }
    Ok(())
}
