//! Command-line surface (spec §6). Overridable options are `Option`s here
//! so `config::merge` can tell a default apart from an explicit flag when
//! layering CLI, YAML config, and built-in defaults.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JailType {
    Nsjail,
    Landjail,
}

#[derive(Debug, Parser)]
#[command(
    name = "boundary",
    about = "Confines a target process's outbound HTTP(S) traffic behind a deny-by-default allowlist"
)]
pub struct Cli {
    /// Repeatable; also read from BOUNDARY_ALLOW (one spec per invocation).
    #[arg(long = "allow", env = "BOUNDARY_ALLOW")]
    pub allow: Vec<String>,

    #[arg(long = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    #[arg(long = "proxy-port")]
    pub proxy_port: Option<u16>,

    #[arg(long = "pprof-enabled")]
    pub pprof_enabled: bool,

    #[arg(long = "pprof-port")]
    pub pprof_port: Option<u16>,

    #[arg(long = "jail-type", value_enum)]
    pub jail_type: Option<JailType>,

    /// Unix-domain socket of an out-of-band audit collector. When unset,
    /// only the local log sink is active.
    #[arg(long = "audit-socket")]
    pub audit_socket: Option<PathBuf>,

    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// The target command and its arguments, given after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}
