//! Process-state calls made between fork and exec.
//!
//! Everything that changes identity, working directory or process image
//! goes through [`Os`], so the launch sequence can be driven against a
//! recording fake in tests.

use nix::errno::Errno;
use nix::unistd::{self, Gid, Uid, User};
use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

pub trait Os {
    /// Tries to get uid 0 back. Succeeds only for a (saved) superuser.
    fn regain_root(&self) -> bool;
    fn getuid(&self) -> u32;
    fn geteuid(&self) -> u32;
    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>, Errno>;
    fn initgroups(&self, user: &str, gid: u32) -> Result<(), Errno>;
    fn setgroups(&self, groups: &[u32]) -> Result<(), Errno>;
    fn setgid(&self, gid: u32) -> Result<(), Errno>;
    fn setuid(&self, uid: u32) -> Result<(), Errno>;
    fn chdir(&self, dir: &Path) -> Result<(), Errno>;
    /// Replaces the process image. Returning at all means it failed.
    fn execve(&self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno;
}

pub struct SystemOs;

impl Os for SystemOs {
    fn regain_root(&self) -> bool {
        unistd::setuid(Uid::from_raw(0)).is_ok()
    }

    fn getuid(&self) -> u32 {
        unistd::getuid().as_raw()
    }

    fn geteuid(&self) -> u32 {
        unistd::geteuid().as_raw()
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>, Errno> {
        Ok(User::from_name(name)?.map(|u| UserEntry {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
        }))
    }

    fn initgroups(&self, user: &str, gid: u32) -> Result<(), Errno> {
        let user = CString::new(user).map_err(|_| Errno::EINVAL)?;
        unistd::initgroups(&user, Gid::from_raw(gid))
    }

    fn setgroups(&self, groups: &[u32]) -> Result<(), Errno> {
        let groups: Vec<Gid> = groups.iter().map(|g| Gid::from_raw(*g)).collect();
        unistd::setgroups(&groups)
    }

    fn setgid(&self, gid: u32) -> Result<(), Errno> {
        unistd::setgid(Gid::from_raw(gid))
    }

    fn setuid(&self, uid: u32) -> Result<(), Errno> {
        unistd::setuid(Uid::from_raw(uid))
    }

    fn chdir(&self, dir: &Path) -> Result<(), Errno> {
        unistd::chdir(dir)
    }

    fn execve(&self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno {
        match unistd::execve(path, argv, envp) {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }
}

/// Unreachable success value of an image replacement.
pub type Replaced = Infallible;
