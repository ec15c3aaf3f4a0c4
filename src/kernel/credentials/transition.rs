//! UID/GID transition to the unprivileged target identity.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid. Once the uid is
//! dropped the process can no longer change its groups.
//!
//! Runs in the forked child between fork and exec: no allocation, no logging.

use super::privilege::PrivilegedLauncher;
use nix::errno::Errno;

/// Individual steps of the transition, reported on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DropStep {
    ClearGroups = 1,
    SetGid = 2,
    SetUid = 3,
    Verify = 4,
}

impl DropStep {
    pub fn name(self) -> &'static str {
        match self {
            DropStep::ClearGroups => "setgroups",
            DropStep::SetGid => "setresgid",
            DropStep::SetUid => "setresuid",
            DropStep::Verify => "verify",
        }
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(DropStep::ClearGroups),
            2 => Some(DropStep::SetGid),
            3 => Some(DropStep::SetUid),
            4 => Some(DropStep::Verify),
            _ => None,
        }
    }
}

/// 4-step transition: clear groups -> setresgid -> setresuid -> verify.
pub fn transition_to_unprivileged(
    _proof: &PrivilegedLauncher,
    uid: u32,
    gid: u32,
) -> Result<(), (DropStep, Errno)> {
    clear_supplementary_groups()?;
    // CRITICAL: GID before UID
    set_gid(gid)?;
    set_uid(uid)?;
    verify_transition(uid, gid)
}

fn clear_supplementary_groups() -> Result<(), (DropStep, Errno)> {
    // SAFETY: an empty group list; the null pointer is never dereferenced.
    if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
        return Err((DropStep::ClearGroups, Errno::last()));
    }
    Ok(())
}

/// MUST be called BEFORE set_uid.
fn set_gid(gid: u32) -> Result<(), (DropStep, Errno)> {
    // SAFETY: setresgid atomically sets real, effective and saved GIDs.
    let gid = gid as libc::gid_t;
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return Err((DropStep::SetGid, Errno::last()));
    }
    Ok(())
}

/// MUST be called AFTER set_gid.
fn set_uid(uid: u32) -> Result<(), (DropStep, Errno)> {
    // SAFETY: setresuid atomically sets real, effective and saved UIDs.
    let uid = uid as libc::uid_t;
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return Err((DropStep::SetUid, Errno::last()));
    }
    Ok(())
}

/// Reads back all three ids with `getresuid`/`getresgid`; the syscall
/// policies admit exactly these two for the check.
fn verify_transition(expected_uid: u32, expected_gid: u32) -> Result<(), (DropStep, Errno)> {
    let (mut ruid, mut euid, mut suid) = (0, 0, 0);
    let (mut rgid, mut egid, mut sgid) = (0, 0, 0);
    // SAFETY: all six out-pointers are valid stack locations.
    let rc = unsafe {
        libc::getresuid(&mut ruid, &mut euid, &mut suid) | libc::getresgid(&mut rgid, &mut egid, &mut sgid)
    };
    if rc != 0 {
        return Err((DropStep::Verify, Errno::last()));
    }

    let uids_match = [ruid, euid, suid].iter().all(|&id| id == expected_uid);
    let gids_match = [rgid, egid, sgid].iter().all(|&id| id == expected_gid);
    if !uids_match || !gids_match {
        return Err((DropStep::Verify, Errno::EPERM));
    }
    Ok(())
}
