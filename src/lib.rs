//! `boundary`: confines a target process's outbound HTTP(S) traffic behind
//! a deny-by-default allowlist, enforced by an in-process MITM proxy and
//! audited locally and to a remote collector.

pub mod audit;
pub mod ca;
pub mod cli;
pub mod config;
pub mod error;
pub mod jail;
pub mod logging;
pub mod nojail;
pub mod pprof;
pub mod proxy;
pub mod rules;
pub mod supervisor;
