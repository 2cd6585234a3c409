//! Packet-filter programme installed inside the namespace and on the host
//! (spec §4.4). Rules are tracked as an explicit list so teardown deletes
//! exactly what setup added, rather than flushing whole tables and
//! clobbering rules the operator installed themselves (spec §9).

use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::warn;

/// One `iptables`/`sysctl` invocation, kept around so teardown can run
/// its inverse.
#[derive(Debug, Clone)]
struct Installed {
    namespace_pid: Option<u32>,
    args: Vec<String>,
    undo_args: Vec<String>,
}

pub struct PacketFilter {
    installed: Vec<Installed>,
}

impl PacketFilter {
    pub fn new() -> PacketFilter {
        PacketFilter { installed: Vec::new() }
    }

    fn run(pid: Option<u32>, args: &[String]) -> Result<()> {
        let status = match pid {
            Some(pid) => {
                let pid_str = pid.to_string();
                let mut full = vec!["-t".to_string(), pid_str, "-n".to_string()];
                full.extend(args.iter().cloned());
                Command::new("nsenter")
                    .args(&full)
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .status()
            }
            None => Command::new(&args[0])
                .args(&args[1..])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .status(),
        }
        .with_context(|| format!("spawning {:?}", args))?;

        if !status.success() {
            bail!("{:?} exited with {status}", args);
        }
        Ok(())
    }

    fn install(&mut self, pid: Option<u32>, args: Vec<&str>, undo: Vec<&str>) -> Result<()> {
        let args: Vec<String> = args.into_iter().map(String::from).collect();
        let undo_args: Vec<String> = undo.into_iter().map(String::from).collect();
        Self::run(pid, &args)?;
        self.installed.push(Installed {
            namespace_pid: pid,
            args,
            undo_args,
        });
        Ok(())
    }

    /// Installs the namespace-side DNAT/ACCEPT/DROP programme that routes
    /// all outbound HTTP(S) and DNS through the in-process proxy and
    /// dummy resolver (spec §4.4, rules 1-4).
    pub fn install_namespace_rules(&mut self, pid: u32, proxy_port: u16, dns_port: u16) -> Result<()> {
        let p = Some(pid);
        let proxy = proxy_port.to_string();
        let dns = dns_port.to_string();

        self.install(
            p,
            vec!["iptables", "-t", "nat", "-A", "OUTPUT", "-p", "tcp", "--dport", "80",
                 "-j", "DNAT", "--to-destination", &format!("192.168.100.1:{proxy}")],
            vec!["iptables", "-t", "nat", "-D", "OUTPUT", "-p", "tcp", "--dport", "80",
                 "-j", "DNAT", "--to-destination", &format!("192.168.100.1:{proxy}")],
        )?;
        self.install(
            p,
            vec!["iptables", "-t", "nat", "-A", "OUTPUT", "-p", "tcp", "--dport", "443",
                 "-j", "DNAT", "--to-destination", &format!("192.168.100.1:{proxy}")],
            vec!["iptables", "-t", "nat", "-D", "OUTPUT", "-p", "tcp", "--dport", "443",
                 "-j", "DNAT", "--to-destination", &format!("192.168.100.1:{proxy}")],
        )?;
        self.install(
            p,
            vec!["iptables", "-t", "nat", "-A", "OUTPUT", "-p", "udp", "--dport", "53",
                 "-j", "DNAT", "--to-destination", &format!("127.0.0.1:{dns}")],
            vec!["iptables", "-t", "nat", "-D", "OUTPUT", "-p", "udp", "--dport", "53",
                 "-j", "DNAT", "--to-destination", &format!("127.0.0.1:{dns}")],
        )?;
        self.install(
            p,
            vec!["iptables", "-t", "nat", "-A", "OUTPUT", "-p", "tcp", "--dport", "53",
                 "-j", "DNAT", "--to-destination", &format!("127.0.0.1:{dns}")],
            vec!["iptables", "-t", "nat", "-D", "OUTPUT", "-p", "tcp", "--dport", "53",
                 "-j", "DNAT", "--to-destination", &format!("127.0.0.1:{dns}")],
        )?;
        self.install(
            p,
            vec!["iptables", "-A", "OUTPUT", "-p", "udp", "-d", "127.0.0.1", "-j", "ACCEPT"],
            vec!["iptables", "-D", "OUTPUT", "-p", "udp", "-d", "127.0.0.1", "-j", "ACCEPT"],
        )?;
        self.install(
            p,
            vec!["iptables", "-A", "OUTPUT", "-p", "udp", "-s", "127.0.0.1", "-j", "ACCEPT"],
            vec!["iptables", "-D", "OUTPUT", "-p", "udp", "-s", "127.0.0.1", "-j", "ACCEPT"],
        )?;
        self.install(
            p,
            vec!["iptables", "-A", "OUTPUT", "-p", "udp", "-j", "DROP"],
            vec!["iptables", "-D", "OUTPUT", "-p", "udp", "-j", "DROP"],
        )?;

        if let Err(err) = Self::run(
            p,
            &["sysctl".into(), "-w".into(), "net.ipv4.conf.all.route_localnet=1".into()],
        ) {
            warn!(error = %err, "route_localnet sysctl failed (best-effort, not fatal)");
        }
        Ok(())
    }

    /// Installs the host-side MASQUERADE rule and enables forwarding
    /// (spec §4.4).
    pub fn install_host_rules(&mut self) -> Result<()> {
        self.install(
            None,
            vec!["iptables", "-t", "nat", "-A", "POSTROUTING", "-s", "192.168.100.0/24", "-j", "MASQUERADE"],
            vec!["iptables", "-t", "nat", "-D", "POSTROUTING", "-s", "192.168.100.0/24", "-j", "MASQUERADE"],
        )?;
        Command::new("sysctl")
            .args(["-w", "net.ipv4.ip_forward=1"])
            .status()
            .context("enabling ip_forward")?;
        Ok(())
    }

    /// Removes every rule this instance installed, in reverse order,
    /// idempotently (spec §4.4: teardown must not depend on successful
    /// setup, and must run on every exit path).
    pub fn teardown(&mut self) {
        while let Some(rule) = self.installed.pop() {
            if let Err(err) = Self::run(rule.namespace_pid, &rule.undo_args) {
                warn!(rule = ?rule.args, error = %err, "failed to remove packet-filter rule during teardown");
            }
        }
    }
}

impl Drop for PacketFilter {
    fn drop(&mut self) {
        if !self.installed.is_empty() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_filter_has_nothing_installed() {
        let filter = PacketFilter::new();
        assert!(filter.installed.is_empty());
    }
}
