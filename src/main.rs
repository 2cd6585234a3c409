//! Entry point: parses CLI/config, sets up logging, and dispatches to the
//! supervisor's parent or child entry point depending on which process
//! this is (spec §4.6, §9). The role check happens exactly once, here.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use boundary::ca::CertificateAuthority;
use boundary::cli::Cli;
use boundary::config;
use boundary::error::BoundaryError;
use boundary::logging;
use boundary::pprof::{self, PprofConfig};
use boundary::rules::Engine;
use boundary::supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match config::resolve(cli) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("boundary: {err:#}");
            return ExitCode::from(boundary::error::EXIT_FAILURE as u8);
        }
    };

    let _logging_guard = match logging::init(settings.log_level, settings.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("boundary: failed to initialize logging: {err:#}");
            return ExitCode::from(boundary::error::EXIT_FAILURE as u8);
        }
    };

    if supervisor::is_child_role() {
        let result = supervisor::run_child(&settings).await;
        return finish(result);
    }

    if let Err(err) = pprof::maybe_start(&PprofConfig {
        enabled: settings.pprof_enabled,
        port: settings.pprof_port,
    })
    .await
    {
        tracing::warn!(error = %err, "pprof setup failed, continuing without it");
    }

    let config_dir = match CertificateAuthority::config_dir(None) {
        Ok(dir) => dir,
        Err(err) => return finish(Err(BoundaryError::Setup(err))),
    };
    let ca = match CertificateAuthority::load_or_generate(&config_dir) {
        Ok(ca) => ca,
        Err(err) => return finish(Err(BoundaryError::Setup(err))),
    };
    let engine = match Engine::from_specs(&settings.allow) {
        Ok(engine) => Arc::new(engine),
        Err(err) => return finish(Err(BoundaryError::Usage(err.to_string()))),
    };

    let result = supervisor::run_parent(&settings, ca, engine).await;
    finish(result)
}

fn finish(result: Result<i32, BoundaryError>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(err) => {
            tracing::error!(error = %err, "boundary exiting");
            ExitCode::from((err.exit_code() & 0xff) as u8)
        }
    }
}
