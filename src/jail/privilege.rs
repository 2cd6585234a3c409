//! Privilege escalation and de-escalation around namespace setup (spec
//! §4.4, §7). A plain `libc`/`nix` uid check stands in for a real
//! capability query (`CAP_NET_ADMIN`/`CAP_SYS_ADMIN`): nothing in the
//! dependency stack speaks `libcap`, and the teacher's own Docker-based
//! model never needed one either.

use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use nix::unistd::{setgid, setuid, Gid, Uid};

/// Set once we've already tried a sudo/setpriv re-exec, so we never loop.
pub const REEXEC_ENV: &str = "BOUNDARY_REEXECED";

pub fn running_as_root() -> bool {
    Uid::effective().is_root()
}

/// Re-executes the current process under `sudo setpriv
/// --ambient-caps=+net_admin,+sys_admin`, carrying the same argv and an
/// env flag that prevents a second attempt. Only returns on failure;
/// success replaces this process image entirely (spec §4.4: "one-shot
/// re-exec").
pub fn reexec_with_privileges() -> Result<()> {
    if std::env::var(REEXEC_ENV).is_ok() {
        bail!("already attempted privilege re-exec once; refusing to loop");
    }

    let current_exe = std::env::current_exe().context("resolving current executable path")?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    let err = Command::new("sudo")
        .arg("setpriv")
        .arg("--ambient-caps=+net_admin,+sys_admin")
        .arg(&current_exe)
        .args(&args)
        .env(REEXEC_ENV, "1")
        .exec();

    Err(anyhow!("re-exec via sudo setpriv failed: {err}"))
}

/// The uid/gid that invoked `boundary`, before any sudo escalation. Used
/// to chown the config directory and to drop credentials before `exec`ing
/// the target (spec §4.2, §4.4).
pub fn invoker_credentials() -> Result<(Uid, Gid)> {
    if let (Ok(uid), Ok(gid)) = (std::env::var("SUDO_UID"), std::env::var("SUDO_GID")) {
        let uid: u32 = uid.parse().context("parsing SUDO_UID")?;
        let gid: u32 = gid.parse().context("parsing SUDO_GID")?;
        return Ok((Uid::from_raw(uid), Gid::from_raw(gid)));
    }
    Ok((Uid::current(), Gid::current()))
}

/// Drops from root to the invoker's uid/gid. Must run in the child just
/// before `exec`ing the target (spec §4.4), and in that order: group
/// first, then user, since dropping the user first would remove the
/// permission to change the group.
pub fn drop_to_invoker_credentials(uid: Uid, gid: Gid) -> Result<()> {
    setgid(gid).context("setgid to invoker gid")?;
    setuid(uid).context("setuid to invoker uid")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoker_credentials_fall_back_to_current_identity_outside_sudo() {
        std::env::remove_var("SUDO_UID");
        std::env::remove_var("SUDO_GID");
        let (uid, gid) = invoker_credentials().unwrap();
        assert_eq!(uid, Uid::current());
        assert_eq!(gid, Gid::current());
    }
}
