//! Network namespace and veth-pair setup (spec §4.4). No netlink crate is
//! available in the dependency stack used here, so interface and address
//! work shells out to the `ip` binary, matching how
//! `EXboys-skilllite::sandbox::linux` shells out to `bwrap`/`firejail`
//! rather than speaking a kernel API directly. Namespace entry for the
//! child uses `nix::sched::unshare` in a `pre_exec` hook, also grounded
//! there.

use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use nix::sched::{unshare, CloneFlags};
use tracing::{debug, warn};

pub const HOST_ADDR: &str = "192.168.100.1";
pub const CHILD_ADDR: &str = "192.168.100.2";
pub const PREFIX_LEN: u8 = 24;

/// veth names are limited to `IFNAMSIZ - 1` (15) bytes by the kernel; stay
/// at 14 to leave room for any suffix tooling appends.
pub fn veth_names(suffix_source: u64) -> (String, String) {
    // "bnd-h" + 8 hex digits = 13 bytes, comfortably under the 14-byte cap.
    let suffix = (suffix_source % 0x1_0000_0000) as u32;
    (format!("bnd-h{suffix:08x}"), format!("bnd-c{suffix:08x}"))
}

/// Installed as a `pre_exec` hook on the child's `Command` so the child
/// enters a fresh network namespace before `exec`ing the target.
///
/// # Safety
/// Must only run between `fork` and `exec` in the child; it may only call
/// async-signal-safe operations, which `unshare` is.
pub unsafe fn unshare_network_namespace() -> std::io::Result<()> {
    unshare(CloneFlags::CLONE_NEWNET)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("unshare(CLONE_NEWNET) failed: {e}")))
}

fn run_ip(args: &[&str]) -> Result<()> {
    let status = Command::new("ip")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .with_context(|| format!("spawning ip {}", args.join(" ")))?;
    if !status.success() {
        bail!("ip {} exited with {status}", args.join(" "));
    }
    Ok(())
}

fn run_nsenter(pid: u32, args: &[&str]) -> Result<()> {
    let pid_str = pid.to_string();
    let mut full = vec!["-t", &pid_str, "-n"];
    full.extend_from_slice(args);
    let status = Command::new("nsenter")
        .args(&full)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .status()
        .with_context(|| format!("spawning nsenter -t {pid} -n {}", args.join(" ")))?;
    if !status.success() {
        bail!("nsenter -t {pid} -n {} exited with {status}", args.join(" "));
    }
    Ok(())
}

/// Creates the veth pair and moves `child_if` into the child's namespace.
pub fn create_veth_pair(host_if: &str, child_if: &str, child_pid: u32) -> Result<()> {
    run_ip(&["link", "add", host_if, "type", "veth", "peer", "name", child_if])?;
    run_ip(&["link", "set", child_if, "netns", &child_pid.to_string()])
}

/// Assigns the host-side address and brings the host veth end up.
pub fn configure_host_side(host_if: &str) -> Result<()> {
    run_ip(&["addr", "add", &format!("{HOST_ADDR}/{PREFIX_LEN}"), "dev", host_if])?;
    run_ip(&["link", "set", host_if, "up"])
}

/// Waits, with bounded exponential backoff, for `child_if` to appear
/// inside `child_pid`'s namespace, then assigns its address, default
/// route, and brings `lo` up (spec §4.4, §5).
pub async fn configure_child_side_when_ready(child_pid: u32, child_if: &str) -> Result<()> {
    wait_for_interface(child_pid, child_if).await?;
    run_nsenter(child_pid, &["ip", "addr", "add", &format!("{CHILD_ADDR}/{PREFIX_LEN}"), "dev", child_if])?;
    run_nsenter(child_pid, &["ip", "link", "set", child_if, "up"])?;
    run_nsenter(child_pid, &["ip", "link", "set", "lo", "up"])?;
    run_nsenter(child_pid, &["ip", "route", "add", "default", "via", HOST_ADDR])?;

    if let Err(err) = run_nsenter(
        child_pid,
        &["sysctl", "-w", "net.ipv4.conf.all.route_localnet=1"],
    ) {
        warn!(error = %err, "enabling route_localnet failed (best-effort)");
    }
    Ok(())
}

async fn wait_for_interface(child_pid: u32, child_if: &str) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut backoff = Duration::from_millis(50);

    loop {
        if interface_exists(child_pid, child_if) {
            debug!(%child_if, "child veth appeared");
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {child_if} to appear in namespace of pid {child_pid}");
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(500));
    }
}

fn interface_exists(child_pid: u32, child_if: &str) -> bool {
    Command::new("nsenter")
        .args(["-t", &child_pid.to_string(), "-n", "ip", "link", "show", child_if])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Polls, from inside the namespace, until the default route the parent
/// installs via `nsenter` becomes visible. Mirrors `wait_for_interface`'s
/// backoff but needs no `nsenter` prefix since the caller is already
/// living in the namespace it's waiting on.
pub async fn wait_for_own_default_route() -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut backoff = Duration::from_millis(50);

    loop {
        let ready = Command::new("ip")
            .args(["route", "show", "default"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map(|o| o.status.success() && !o.stdout.is_empty())
            .unwrap_or(false);
        if ready {
            debug!("namespace default route is ready");
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for this namespace's default route to appear");
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(500));
    }
}

/// Removing the host veth end also destroys its peer, so namespace
/// teardown reduces to this one call plus the kernel's own cleanup when
/// the last process in a namespace exits (spec §4.4).
pub fn remove_host_veth(host_if: &str) -> Result<()> {
    run_ip(&["link", "delete", host_if])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_fit_in_ifnamsiz() {
        let (host, child) = veth_names(123456789);
        assert!(host.len() <= 14);
        assert!(child.len() <= 14);
        assert_ne!(host, child);
    }

    #[test]
    fn veth_names_differ_by_suffix() {
        let (h1, _) = veth_names(1);
        let (h2, _) = veth_names(2);
        assert_ne!(h1, h2);
    }
}
