//! The supervisor: two explicit entry points, one for the process that
//! orchestrates the jail and one for the process that lives inside it
//! (spec §4.6, §9 — "re-architect as two explicit entry points... avoid a
//! global 'am I the child' predicate"). `main.rs` decides which to call by
//! checking `is_child_role()` once, before either runs.
//!
//! Grounded on `prison-network`'s single-process `main()` for the target
//! spawn/wait/relay shape, generalised to a two-process split since this
//! crate's jail core needs an actual namespace boundary the teacher never
//! had (it isolated via Docker instead).

use std::collections::HashMap;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::{LogSink, MultiSink, Sink, SocketSink};
use crate::ca::CertificateAuthority;
use crate::cli::JailType;
use crate::config::Settings;
use crate::error::BoundaryError;
use crate::jail::{dns, netns, privilege, JailHandles};
use crate::nojail;
use crate::proxy::{ProxyListener, ProxyState};
use crate::rules::Engine;

/// Set on the re-exec'd process so `main.rs` dispatches to `run_child`
/// instead of `run_parent`. The child never needs to know the veth name
/// the parent picked for it: all interface/route configuration happens
/// from the parent side via `nsenter`, and the child only waits for its
/// default route to appear.
pub const CHILD_ROLE_ENV: &str = "BOUNDARY_CHILD_ROLE";

const CA_TRUST_ENV_VARS: &[&str] =
    &["SSL_CERT_FILE", "CURL_CA_BUNDLE", "GIT_SSL_CAINFO", "REQUESTS_CA_BUNDLE", "NODE_EXTRA_CA_CERTS"];

pub fn is_child_role() -> bool {
    std::env::var(CHILD_ROLE_ENV).is_ok()
}

fn ca_trust_env(ca_cert_path: &Path, config_dir: &Path) -> HashMap<String, String> {
    let mut env = HashMap::new();
    let cert = ca_cert_path.display().to_string();
    for key in CA_TRUST_ENV_VARS {
        env.insert((*key).to_string(), cert.clone());
    }
    env.insert("SSL_CERT_DIR".to_string(), config_dir.display().to_string());
    env
}

fn build_auditor(settings: &Settings) -> (Arc<dyn Sink>, Option<crate::audit::SocketSinkHandle>) {
    let log_sink: Arc<dyn Sink> = Arc::new(LogSink);
    match &settings.audit_socket {
        None => (log_sink, None),
        Some(path) => {
            let (socket_sink, handle) = SocketSink::spawn(path.clone());
            let multi = MultiSink::new(vec![log_sink, socket_sink]);
            (Arc::new(multi), Some(handle))
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Runs `--jail-type landjail`: no namespace, no veth, no dummy DNS. The
/// target is spawned directly with `HTTP(S)_PROXY` pointed at the proxy,
/// and must cooperate by reading those variables itself (spec §9).
async fn run_landjail(
    settings: &Settings,
    ca: Arc<CertificateAuthority>,
    engine: Arc<Engine>,
) -> Result<i32, BoundaryError> {
    let config_dir = CertificateAuthority::config_dir(None)
        .map_err(BoundaryError::Setup)?;
    let (auditor, socket_handle) = build_auditor(settings);

    let mut env = ca_trust_env(&config_dir.join("ca-cert.pem"), &config_dir);
    nojail::apply_proxy_env(&mut env, settings.proxy_port);

    let proxy_state = Arc::new(ProxyState {
        ca,
        engine,
        auditor: auditor.clone(),
        proxy_port: settings.proxy_port,
    });
    let listener = ProxyListener::bind(settings.proxy_port)
        .await
        .map_err(BoundaryError::Setup)?;
    let cancel = CancellationToken::new();
    let proxy_cancel = cancel.clone();
    let proxy_task = tokio::spawn(async move { listener.run(proxy_state, proxy_cancel).await });

    let mut child = spawn_target(&settings.command, &env).map_err(BoundaryError::Setup)?;

    let exit_code = tokio::select! {
        status = child.wait() => {
            status_to_exit_code(status.context("waiting on target process")).map_err(BoundaryError::RuntimeFatal)?
        }
        signal_name = shutdown_signal() => {
            info!(signal = signal_name, "received shutdown signal, terminating target");
            terminate_child(&mut child);
            0
        }
    };

    cancel.cancel();
    if let Err(err) = proxy_task.await {
        warn!(error = %err, "proxy task did not shut down cleanly");
    }
    if let Some(handle) = socket_handle {
        let dropped = handle.shutdown().await;
        if dropped > 0 {
            warn!(dropped, "audit events dropped over the session");
        }
    }

    Ok(exit_code)
}

/// Runs `--jail-type nsjail`: the full network-namespace jail. Escalates
/// privileges if needed, forks a child into a fresh namespace, wires up
/// veth/iptables/DNS, runs the proxy on the host side, and waits for the
/// child (which itself execs the target) to exit (spec §4.4, §4.6).
async fn run_nsjail(
    settings: &Settings,
    ca: Arc<CertificateAuthority>,
    engine: Arc<Engine>,
) -> Result<i32, BoundaryError> {
    if !privilege::running_as_root() {
        let err = privilege::reexec_with_privileges().unwrap_err();
        return Err(BoundaryError::Privilege(format!("{err:#}")));
    }

    let (auditor, socket_handle) = build_auditor(settings);

    let current_exe = std::env::current_exe().map_err(|e| BoundaryError::Setup(e.into()))?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut cmd = tokio::process::Command::new(&current_exe);
    cmd.args(&args)
        .env(CHILD_ROLE_ENV, "1")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    // Safety: runs between fork and exec in the forked child, the only
    // context `unshare_network_namespace` is safe to call from.
    unsafe {
        cmd.pre_exec(|| unsafe { netns::unshare_network_namespace() });
    }
    let mut child = cmd.spawn().map_err(|e| BoundaryError::Setup(e.into()))?;
    let child_pid = child.id().context("spawned child exited before its pid could be read")
        .map_err(BoundaryError::Setup)?;

    let suffix_source = u64::from(child_pid);
    let mut jail = JailHandles::setup_host_side(child_pid, suffix_source)
        .map_err(BoundaryError::Setup)?;

    if let Err(err) = jail.configure_namespace_side(child_pid, settings.proxy_port).await {
        jail.teardown();
        let _ = child.kill().await;
        return Err(BoundaryError::Setup(err));
    }

    let proxy_state = Arc::new(ProxyState {
        ca,
        engine,
        auditor: auditor.clone(),
        proxy_port: settings.proxy_port,
    });
    let listener = match ProxyListener::bind(settings.proxy_port).await {
        Ok(l) => l,
        Err(err) => {
            jail.teardown();
            let _ = child.kill().await;
            return Err(BoundaryError::Setup(err));
        }
    };
    let cancel = CancellationToken::new();
    let proxy_cancel = cancel.clone();
    let proxy_task = tokio::spawn(async move { listener.run(proxy_state, proxy_cancel).await });

    let exit_code = tokio::select! {
        status = child.wait() => {
            match status_to_exit_code(status.context("waiting on namespaced child")) {
                Ok(code) => code,
                Err(err) => {
                    jail.teardown();
                    cancel.cancel();
                    let _ = proxy_task.await;
                    return Err(BoundaryError::RuntimeFatal(err));
                }
            }
        }
        signal_name = shutdown_signal() => {
            info!(signal = signal_name, "received shutdown signal, tearing down jail");
            let _ = child.kill().await;
            let _ = child.wait().await;
            0
        }
    };

    cancel.cancel();
    if let Err(err) = proxy_task.await {
        warn!(error = %err, "proxy task did not shut down cleanly");
    }
    jail.teardown();
    if let Some(handle) = socket_handle {
        let dropped = handle.shutdown().await;
        if dropped > 0 {
            warn!(dropped, "audit events dropped over the session");
        }
    }

    Ok(exit_code)
}

pub async fn run_parent(
    settings: &Settings,
    ca: Arc<CertificateAuthority>,
    engine: Arc<Engine>,
) -> Result<i32, BoundaryError> {
    if settings.command.is_empty() {
        return Err(BoundaryError::Usage("no command specified".to_string()));
    }

    match settings.jail_type {
        JailType::Landjail => run_landjail(settings, ca, engine).await,
        JailType::Nsjail => run_nsjail(settings, ca, engine).await,
    }
}

/// The process living inside the namespace once `unshare(CLONE_NEWNET)` and
/// the re-exec into itself have already happened. Waits for the parent to
/// finish addressing the namespace, starts the dummy DNS responder, drops
/// to the invoker's credentials, then `exec`s the real target (spec §4.4
/// steps 1-3 of the supervisor's child role).
pub async fn run_child(settings: &Settings) -> Result<i32, BoundaryError> {
    if settings.command.is_empty() {
        return Err(BoundaryError::Usage("no command specified".to_string()));
    }

    netns::wait_for_own_default_route()
        .await
        .map_err(BoundaryError::Setup)?;

    let dns_cancel = CancellationToken::new();
    let dns_task = {
        let cancel = dns_cancel.clone();
        tokio::spawn(dns::run(dns::DEFAULT_DNS_PORT, cancel))
    };

    let config_dir = CertificateAuthority::config_dir(None).map_err(BoundaryError::Setup)?;
    let (uid, gid) = privilege::invoker_credentials().map_err(BoundaryError::Privilege)?;

    // Inherit the parent environment, then overlay the CA trust variables
    // so they win over anything already set.
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.extend(ca_trust_env(&config_dir.join("ca-cert.pem"), &config_dir));

    let program = &settings.command[0];
    let rest = &settings.command[1..];
    let mut cmd = std::process::Command::new(program);
    cmd.args(rest).env_clear().envs(&env);

    // Drop privileges in the pre_exec hook, which runs after fork but
    // before exec in the forked child of *this* process.
    unsafe {
        cmd.pre_exec(move || privilege::drop_to_invoker_credentials(uid, gid).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("{e:#}"))
        }));
    }

    let err = cmd.exec();
    dns_cancel.cancel();
    let _ = dns_task.abort();
    Err(BoundaryError::Setup(anyhow::anyhow!("exec of target command failed: {err}")))
}

fn spawn_target(command: &[String], env: &HashMap<String, String>) -> anyhow::Result<tokio::process::Child> {
    let program = &command[0];
    let rest = &command[1..];
    tokio::process::Command::new(program)
        .args(rest)
        .envs(env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("spawning target command {program}"))
}

fn terminate_child(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
}

fn status_to_exit_code(status: anyhow::Result<std::process::ExitStatus>) -> anyhow::Result<i32> {
    let status = status?;
    if let Some(code) = status.code() {
        return Ok(code);
    }
    if let Some(signal) = status.signal() {
        warn!(signal, "target process terminated by signal");
        return Ok(128 + signal);
    }
    Ok(1)
}
