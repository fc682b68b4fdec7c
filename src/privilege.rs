use log::{debug, error, warn};

use crate::config::Control;
use crate::error::GatewayError;
use crate::http::ScriptOwner;
use crate::sys::Os;

/// Identity a script is started under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeDecision {
    NamedUser(String),
    FileOwner(ScriptOwner),
    Refuse,
}

pub fn decide(control: &Control, owner: ScriptOwner) -> PrivilegeDecision {
    if let Some(name) = &control.script_user {
        PrivilegeDecision::NamedUser(name.clone())
    } else if control.run_scripts_as_owner {
        PrivilegeDecision::FileOwner(owner)
    } else {
        PrivilegeDecision::Refuse
    }
}

/// Switches the process to the identity the control asks for, then makes
/// sure neither real nor effective uid is still the superuser's.
pub fn drop_privileges(os: &dyn Os, control: &Control, owner: ScriptOwner) -> Result<(), GatewayError> {
    if os.regain_root() {
        match decide(control, owner) {
            PrivilegeDecision::NamedUser(name) => become_user(os, &name, control.min_script_uid)?,
            PrivilegeDecision::FileOwner(owner) => set_uids(os, owner, control.min_script_uid)?,
            PrivilegeDecision::Refuse => {
                warn!("cannot run scripts without changing identity");
                return Err(GatewayError::NoIdentityPolicy);
            }
        }
    } else if control.wants_identity_change() {
        warn!("control {} changes script identity but the server is not root", control.path);
        return Err(GatewayError::NotSuperuser);
    }

    if os.getuid() == 0 || os.geteuid() == 0 {
        error!("cannot run scripts as the super-user");
        return Err(GatewayError::StillSuperuser);
    }
    Ok(())
}

fn become_user(os: &dyn Os, name: &str, min_uid: u32) -> Result<(), GatewayError> {
    let pw = match os.user_by_name(name) {
        Ok(Some(pw)) => pw,
        Ok(None) => {
            warn!("{}: no such user", name);
            return Err(GatewayError::UnknownUser(name.to_string()));
        }
        Err(source) => {
            warn!("getpwnam {}: {}", name, source);
            return Err(GatewayError::UserLookup { name: name.to_string(), source });
        }
    };
    check_uid(pw.uid, min_uid)?;

    call("initgroups", os.initgroups(name, pw.gid))?;
    call("setgid", os.setgid(pw.gid))?;
    call("setuid", os.setuid(pw.uid))?;
    debug!("running script as {} (uid {}, gid {})", name, pw.uid, pw.gid);
    Ok(())
}

fn set_uids(os: &dyn Os, owner: ScriptOwner, min_uid: u32) -> Result<(), GatewayError> {
    check_uid(owner.uid, min_uid)?;

    call("setgroups", os.setgroups(&[owner.gid]))?;
    call("setgid", os.setgid(owner.gid))?;
    call("setuid", os.setuid(owner.uid))?;
    debug!("running script as owner uid {}, gid {}", owner.uid, owner.gid);
    Ok(())
}

fn check_uid(uid: u32, min_uid: u32) -> Result<(), GatewayError> {
    if uid == 0 || uid < min_uid {
        warn!("refusing to set uid to {}", uid);
        return Err(GatewayError::DisallowedUid(uid));
    }
    Ok(())
}

fn call(name: &'static str, result: Result<(), nix::errno::Errno>) -> Result<(), GatewayError> {
    result.map_err(|source| {
        error!("{}: {}", name, source);
        GatewayError::Syscall { call: name, source }
    })
}
