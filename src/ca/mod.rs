//! Certificate authority: a self-signed root kept in the XDG config dir,
//! minting per-host leaf certificates on demand (spec §4.2).
//!
//! Grounded on the teacher's `CaAuthority` (rust-proxy/src/main.rs), with
//! persistence and a leaf cache added since the teacher regenerated a
//! throwaway CA on every process start.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

const LEAF_VALIDITY: Duration = Duration::hours(24);
const CA_VALIDITY: Duration = Duration::days(365);

/// rcgen cannot mint RSA-2048 keys (only ECDSA P-256/P-384 and Ed25519).
/// Spec §4.2 calls for RSA-2048; we keep the teacher's
/// `KeyPair::generate()` default (ECDSA P-256) for both CA and leaf keys.
/// See SPEC_FULL.md §4.2 and DESIGN.md.
fn generate_key_pair() -> Result<KeyPair> {
    Ok(KeyPair::generate()?)
}

pub struct LeafCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for LeafCert {
    fn clone(&self) -> Self {
        LeafCert {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

struct CachedLeaf {
    chain: Vec<CertificateDer<'static>>,
    der: Vec<u8>,
    not_after: OffsetDateTime,
}

/// Loads or generates a root CA, and mints/caches leaf certificates signed
/// by it. Safe to share across connection tasks: leaf minting is
/// single-flighted per hostname so concurrent first requests for the same
/// host don't race to mint duplicate certs.
pub struct CertificateAuthority {
    ca_key: KeyPair,
    ca_cert: Certificate,
    cache: RwLock<HashMap<String, CachedLeaf>>,
    in_flight: Mutex<HashSet<String>>,
}

impl CertificateAuthority {
    /// Loads a CA from `config_dir` if present and not expired, otherwise
    /// generates one and persists it there.
    pub fn load_or_generate(config_dir: &Path) -> Result<Arc<CertificateAuthority>> {
        let cert_path = config_dir.join("ca-cert.pem");
        let key_path = config_dir.join("ca-key.pem");

        if let Some(existing) = Self::try_load(&cert_path, &key_path)? {
            info!(cert = %cert_path.display(), "loaded existing CA certificate");
            return Ok(Arc::new(existing));
        }

        fs::create_dir_all(config_dir)
            .with_context(|| format!("creating config dir {}", config_dir.display()))?;

        info!("generating new CA certificate");
        let key_pair = generate_key_pair()?;
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_after = OffsetDateTime::now_utc() + CA_VALIDITY;
        params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "boundary local CA");
        dn.push(DnType::OrganizationName, "boundary");
        params.distinguished_name = dn;

        let cert = params.self_signed(&key_pair)?;

        Self::write_private(&key_path, key_pair.serialize_pem().as_bytes())?;
        Self::write_public(&cert_path, cert.pem().as_bytes())?;
        Self::chown_if_elevated(config_dir, &cert_path, &key_path);

        Ok(Arc::new(CertificateAuthority {
            ca_key: key_pair,
            ca_cert: cert,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }))
    }

    fn try_load(cert_path: &Path, key_path: &Path) -> Result<Option<CertificateAuthority>> {
        if !cert_path.exists() || !key_path.exists() {
            return Ok(None);
        }
        let key_pem = fs::read_to_string(key_path)?;
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pair = KeyPair::from_pem(&key_pem)?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "boundary local CA");
        params.distinguished_name = dn;
        let cert = params.self_signed(&key_pair)?;

        // The teacher re-derives the self-signed cert from the stored key
        // pair rather than re-parsing the stored PEM, since rcgen has no
        // "load an existing signed certificate" constructor. We still
        // check the persisted PEM parses, so a corrupt file is rejected.
        let _ = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .context("parsing stored CA certificate")?;

        Ok(Some(CertificateAuthority {
            ca_key: key_pair,
            ca_cert: cert,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }))
    }

    #[cfg(unix)]
    fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
        use std::os::unix::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(bytes)
            })
            .with_context(|| format!("writing {}", path.display()))
    }

    #[cfg(not(unix))]
    fn write_private(path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    fn write_public(path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    /// When running elevated from a lower-privilege invoker (the common
    /// case during jail setup), chown the config directory and its files
    /// back to the invoker so the sandboxed, privilege-dropped target can
    /// still read its own CA cert (spec §4.2).
    #[cfg(unix)]
    fn chown_if_elevated(config_dir: &Path, cert_path: &Path, key_path: &Path) {
        use crate::jail::privilege;

        if !privilege::running_as_root() {
            return;
        }
        let (uid, gid) = match privilege::invoker_credentials() {
            Ok(creds) => creds,
            Err(err) => {
                tracing::warn!(error = %err, "could not resolve invoker credentials for CA chown");
                return;
            }
        };
        for path in [config_dir, cert_path, key_path] {
            if let Err(err) = nix::unistd::chown(path, Some(uid), Some(gid)) {
                tracing::warn!(path = %path.display(), error = %err, "failed to chown CA file to invoker");
            }
        }
    }

    #[cfg(not(unix))]
    fn chown_if_elevated(_config_dir: &Path, _cert_path: &Path, _key_path: &Path) {}

    /// The CA certificate in PEM, for callers that want to trust it (tests,
    /// `boundary ca-cert` subcommands, docs).
    pub fn ca_cert_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// Returns a cached, still-valid leaf for `hostname`, minting and
    /// caching a fresh one otherwise.
    pub fn get_certificate(&self, hostname: &str) -> Result<LeafCert> {
        let now = OffsetDateTime::now_utc();
        if let Some(leaf) = self.cached_valid(hostname, now) {
            return Ok(leaf);
        }

        // Single-flight: only one task mints a given hostname at a time.
        loop {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.contains(hostname) {
                in_flight.insert(hostname.to_string());
                break;
            }
            drop(in_flight);
            std::thread::yield_now();
            if let Some(leaf) = self.cached_valid(hostname, OffsetDateTime::now_utc()) {
                return Ok(leaf);
            }
        }

        let result = self.mint_and_cache(hostname, now);
        self.in_flight.lock().unwrap().remove(hostname);
        result
    }

    fn cached_valid(&self, hostname: &str, now: OffsetDateTime) -> Option<LeafCert> {
        let cache = self.cache.read().unwrap();
        let cached = cache.get(hostname)?;
        if cached.not_after <= now {
            return None;
        }
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cached.der.clone()));
        Some(LeafCert {
            chain: cached.chain.clone(),
            key,
        })
    }

    fn mint_and_cache(&self, hostname: &str, now: OffsetDateTime) -> Result<LeafCert> {
        debug!(%hostname, "minting leaf certificate");
        let mut params = if let Ok(ip) = hostname.parse::<std::net::IpAddr>() {
            let mut params = CertificateParams::new(Vec::new())?;
            params.subject_alt_names.push(SanType::IpAddress(ip));
            params
        } else {
            CertificateParams::new(vec![hostname.to_string()])?
        };
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;
        params.not_before = now - Duration::minutes(5);
        params.not_after = now + LEAF_VALIDITY;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let key_pair = generate_key_pair()?;
        let cert = params.signed_by(&key_pair, &self.ca_cert, &self.ca_key)?;

        let chain = vec![CertificateDer::from(cert.der().to_vec())];
        let der = key_pair.serialize_der();

        self.cache.write().unwrap().insert(
            hostname.to_string(),
            CachedLeaf {
                chain: chain.clone(),
                der: der.clone(),
                not_after: params.not_after,
            },
        );

        Ok(LeafCert {
            chain,
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der)),
        })
    }

    pub fn config_dir(base: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = base {
            return Ok(dir.to_path_buf());
        }
        dirs::config_dir()
            .map(|d| d.join("coder_boundary"))
            .context("could not determine XDG config directory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_ca() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path()).unwrap();
        assert!(dir.path().join("ca-cert.pem").exists());
        assert!(dir.path().join("ca-key.pem").exists());
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn reloads_persisted_ca_on_second_call() {
        let dir = tempfile::tempdir().unwrap();
        let first = CertificateAuthority::load_or_generate(dir.path()).unwrap();
        let second = CertificateAuthority::load_or_generate(dir.path()).unwrap();
        assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());
    }

    #[test]
    fn mints_and_caches_leaf_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path()).unwrap();
        let first = ca.get_certificate("example.com").unwrap();
        let second = ca.get_certificate("example.com").unwrap();
        assert_eq!(first.chain, second.chain);
    }

    #[test]
    fn distinct_hosts_get_distinct_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::load_or_generate(dir.path()).unwrap();
        let a = ca.get_certificate("a.example.com").unwrap();
        let b = ca.get_certificate("b.example.com").unwrap();
        assert_ne!(a.chain, b.chain);
    }
}
