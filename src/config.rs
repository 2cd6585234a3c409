//! YAML config file loading and CLI/file/default layering (spec §6).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::{Cli, JailType, LogLevel};

pub const DEFAULT_PROXY_PORT: u16 = 8080;
pub const DEFAULT_PPROF_PORT: u16 = 6060;
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Warn;
pub const DEFAULT_JAIL_TYPE: JailType = JailType::Nsjail;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
    pub log_level: Option<LogLevel>,
    pub log_dir: Option<PathBuf>,
    pub proxy_port: Option<u16>,
    pub pprof_enabled: Option<bool>,
    pub pprof_port: Option<u16>,
    pub jail_type: Option<JailType>,
    pub audit_socket: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// The fully resolved, post-layering settings the rest of the program
/// consumes. CLI overrides file; file overrides built-in default. `allow`
/// specs from the CLI and the file are concatenated, not overridden (spec
/// §6).
#[derive(Debug)]
pub struct Settings {
    pub allow: Vec<String>,
    pub log_level: LogLevel,
    pub log_dir: Option<PathBuf>,
    pub proxy_port: u16,
    pub pprof_enabled: bool,
    pub pprof_port: u16,
    pub jail_type: JailType,
    pub audit_socket: Option<PathBuf>,
    pub command: Vec<String>,
}

pub fn resolve(cli: Cli) -> Result<Settings> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mut allow = file.allowlist;
    allow.extend(cli.allow.iter().cloned());

    Ok(Settings {
        allow,
        log_level: cli.log_level.or(file.log_level).unwrap_or(DEFAULT_LOG_LEVEL),
        log_dir: cli.log_dir.or(file.log_dir),
        proxy_port: cli.proxy_port.or(file.proxy_port).unwrap_or(DEFAULT_PROXY_PORT),
        pprof_enabled: cli.pprof_enabled || file.pprof_enabled.unwrap_or(false),
        pprof_port: cli.pprof_port.or(file.pprof_port).unwrap_or(DEFAULT_PPROF_PORT),
        jail_type: cli.jail_type.or(file.jail_type).unwrap_or(DEFAULT_JAIL_TYPE),
        audit_socket: cli.audit_socket.or(file.audit_socket),
        command: cli.command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cli() -> Cli {
        Cli {
            allow: Vec::new(),
            log_level: None,
            log_dir: None,
            proxy_port: None,
            pprof_enabled: false,
            pprof_port: None,
            jail_type: None,
            audit_socket: None,
            config: None,
            command: vec!["curl".to_string(), "example.com".to_string()],
        }
    }

    #[test]
    fn defaults_apply_with_no_cli_or_file_input() {
        let settings = resolve(empty_cli()).unwrap();
        assert_eq!(settings.proxy_port, DEFAULT_PROXY_PORT);
        assert_eq!(settings.jail_type, DEFAULT_JAIL_TYPE);
        assert!(settings.allow.is_empty());
    }

    #[test]
    fn cli_allow_specs_are_carried_through() {
        let mut cli = empty_cli();
        cli.allow = vec!["domain=github.com".to_string()];
        let settings = resolve(cli).unwrap();
        assert_eq!(settings.allow, vec!["domain=github.com".to_string()]);
    }

    #[test]
    fn cli_overrides_file_but_allow_lists_concatenate() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("boundary.yaml");
        fs::write(
            &config_path,
            "allowlist:\n  - domain=example.com\nproxy_port: 9090\n",
        )
        .unwrap();

        let mut cli = empty_cli();
        cli.config = Some(config_path);
        cli.allow = vec!["domain=github.com".to_string()];
        cli.proxy_port = Some(1234);

        let settings = resolve(cli).unwrap();
        assert_eq!(settings.proxy_port, 1234);
        assert_eq!(
            settings.allow,
            vec!["domain=example.com".to_string(), "domain=github.com".to_string()]
        );
    }
}
