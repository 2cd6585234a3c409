//! Optional profiling endpoint (`--pprof-enabled`, `--pprof-port`).
//!
//! TODO: no profiling crate (e.g. `pprof`) is part of this dependency
//! stack; wire one in before this flag does anything beyond being parsed
//! and validated.

use anyhow::Result;

pub struct PprofConfig {
    pub enabled: bool,
    pub port: u16,
}

pub async fn maybe_start(config: &PprofConfig) -> Result<()> {
    if config.enabled {
        tracing::warn!(port = config.port, "pprof endpoint requested but not yet implemented");
    }
    Ok(())
}
