//! UID/GID transitions for privilege dropping.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid.

mod privilege;
mod transition;
mod validation;

pub use privilege::PrivilegedLauncher;
pub use transition::{transition_to_unprivileged, DropStep};
pub use validation::validate_identity;
