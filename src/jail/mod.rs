//! The network-namespace jail: veth plumbing, packet filter, dummy DNS,
//! and privilege handling (spec §4.4). Grounded on
//! `EXboys-skilllite::sandbox::linux` for the `unshare`/`pre_exec` shape;
//! the teacher itself isolates via Docker and has no equivalent code.

pub mod dns;
pub mod iptables;
pub mod netns;
pub mod privilege;

use anyhow::{Context, Result};
use tracing::{info, warn};

use iptables::PacketFilter;

pub struct JailHandles {
    pub host_veth: String,
    pub child_veth: String,
    packet_filter: PacketFilter,
}

impl JailHandles {
    /// Host-side setup: veth pair, host addressing, MASQUERADE + forwarding
    /// (spec §4.4 steps 3-4 of the supervisor's parent role).
    pub fn setup_host_side(child_pid: u32, suffix_source: u64) -> Result<JailHandles> {
        let (host_veth, child_veth) = netns::veth_names(suffix_source);
        netns::create_veth_pair(&host_veth, &child_veth, child_pid)
            .context("creating veth pair")?;
        netns::configure_host_side(&host_veth).context("configuring host veth")?;

        let mut packet_filter = PacketFilter::new();
        packet_filter.install_host_rules().context("installing host packet filter")?;

        info!(%host_veth, %child_veth, child_pid, "jail host-side networking ready");
        Ok(JailHandles {
            host_veth,
            child_veth,
            packet_filter,
        })
    }

    /// Waits for the child's veth to appear inside its namespace, addresses
    /// it, and installs the in-namespace packet filter. Run from the
    /// parent, which has the child's pid; `nsenter` can act on a namespace
    /// without the caller having entered it (spec §4.4 steps 3-4 of the
    /// supervisor's parent role). The dummy DNS responder, by contrast,
    /// must bind a socket from inside the namespace, so it is started by
    /// the child itself (see `supervisor::run_child`).
    pub async fn configure_namespace_side(&mut self, child_pid: u32, proxy_port: u16) -> Result<()> {
        netns::configure_child_side_when_ready(child_pid, &self.child_veth)
            .await
            .context("configuring child veth")?;
        self.packet_filter
            .install_namespace_rules(child_pid, proxy_port, dns::DEFAULT_DNS_PORT)
            .context("installing namespace packet filter")?;
        Ok(())
    }

    /// Idempotent teardown: remove every installed packet-filter rule, then
    /// delete the host veth (which also destroys its namespaced peer). Safe
    /// to call after partial setup (spec §4.4, §5).
    pub fn teardown(&mut self) {
        self.packet_filter.teardown();
        if let Err(err) = netns::remove_host_veth(&self.host_veth) {
            warn!(error = %err, "failed to remove host veth during teardown");
        }
    }
}
