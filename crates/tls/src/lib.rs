//! Self-signed certificate generation and persistence for the Chat
//! Interceptor's loopback TLS listener.
//!
//! The client is launched with `chat.allow_bad_cert.enabled = true` (see
//! the Config Interceptor), so this is not meant to be trusted by
//! anything else — it is a single self-signed leaf: Subject CN
//! `"League Deceiver CA"`, SANs `DNS:localhost` and `IP:127.0.0.1`,
//! 10-year validity, RSA 2048, `basicConstraints cA=true`.

use std::{
    io::BufReader,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::SystemTime,
};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType};
use rsa::{
    RsaPrivateKey,
    pkcs8::{EncodePrivateKey, LineEnding},
    rand_core::OsRng,
};
use rustls::ServerConfig;
use time::OffsetDateTime;
use tracing::info;

pub mod error;
pub use error::{Error, Result};

use error::Context as _;

/// Subject CN of the generated certificate.
pub const CERT_CN: &str = "League Deceiver CA";

/// RSA key size in bits.
const RSA_KEY_BITS: usize = 2048;

/// Certificate validity, in days.
const VALIDITY_DAYS: i64 = 365 * 10;

/// Regenerate a bit ahead of actual expiry so a long-idle install never
/// hands out a cert that expires mid-session.
const REGEN_THRESHOLD_DAYS: i64 = 365 * 9;

/// Trait for TLS certificate management, so the Chat Interceptor can be
/// tested against an in-memory or pre-seeded implementation.
pub trait CertManager: Send + Sync {
    /// Returns `(cert_path, key_path)`, generating the pair if missing
    /// or close to expiry.
    fn ensure_certs(&self) -> Result<(PathBuf, PathBuf)>;

    /// Builds a `rustls::ServerConfig` from the given cert and key PEM files.
    fn build_rustls_config(&self, cert: &Path, key: &Path) -> Result<ServerConfig>;
}

/// Default file-system-backed certificate manager.
pub struct FsCertManager {
    cert_dir: PathBuf,
}

impl FsCertManager {
    pub fn new() -> Result<Self> {
        Ok(Self { cert_dir: cert_dir()? })
    }

    #[cfg(test)]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { cert_dir: dir }
    }
}

/// Returns the certificate storage directory (`~/.config/league-deceiver/certs/`).
pub fn cert_dir() -> Result<PathBuf> {
    let dir = deceive_config::config_dir().join("certs");
    std::fs::create_dir_all(&dir).context("create certs directory")?;
    Ok(dir)
}

impl CertManager for FsCertManager {
    fn ensure_certs(&self) -> Result<(PathBuf, PathBuf)> {
        let cert_path = self.cert_dir.join("server.pem");
        let key_path = self.cert_dir.join("server-key.pem");

        let need_regen = !cert_path.exists() || !key_path.exists() || is_stale(&cert_path);

        if need_regen {
            info!("generating TLS certificate");
            let (cert_pem, key_pem) = generate_leaf()?;
            std::fs::write(&cert_path, &cert_pem).context("write cert file")?;
            std::fs::write(&key_path, &key_pem).context("write key file")?;
            info!(dir = %self.cert_dir.display(), "certificate written");
        }

        Ok((cert_path, key_path))
    }

    fn build_rustls_config(&self, cert: &Path, key: &Path) -> Result<ServerConfig> {
        load_rustls_config(cert, key)
    }
}

/// `true` if the cert at `path` is missing, unreadable, or old enough
/// that it should be regenerated ahead of its 10-year validity.
fn is_stale(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = meta.modified() else {
        return true;
    };
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    age > time::Duration::days(REGEN_THRESHOLD_DAYS).unsigned_abs()
}

/// Generates the self-signed leaf. Returns `(cert_pem, key_pem)`.
fn generate_leaf() -> Result<(String, String)> {
    let now = OffsetDateTime::now_utc();
    let key_pair = generate_rsa_key_pair()?;

    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params.distinguished_name.push(DnType::CommonName, CERT_CN);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.subject_alt_names = vec![
        SanType::DnsName("localhost".try_into()?),
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    ];
    params.not_before = now;
    params.not_after = now + time::Duration::days(VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// `rcgen`'s own key generation only covers the curves `ring` supports
/// (EC/Ed25519), not RSA. The RSA key is generated with the `rsa` crate
/// and the resulting PEM handed to `rcgen` purely so it can sign the cert.
fn generate_rsa_key_pair() -> Result<KeyPair> {
    let private_key =
        RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|e| Error::message(format!("generate RSA key: {e}")))?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| Error::message(format!("encode RSA key: {e}")))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)?;
    Ok(key_pair)
}

/// Loads cert + key PEM files into a `rustls::ServerConfig`.
fn load_rustls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let cert_file = std::fs::File::open(cert_path).context("open server cert")?;
    let key_file = std::fs::File::open(key_path).context("open server key")?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::message(format!("parse certs: {e}")))?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| Error::message(format!("parse private key: {e}")))?
        .ok_or_else(|| Error::message("no private key found in server-key.pem"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_leaf_produces_valid_pem() {
        let (cert_pem, key_pem) = generate_leaf().unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn certs_persist_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FsCertManager::with_dir(tmp.path().to_path_buf());
        let (cert, key) = mgr.ensure_certs().unwrap();
        assert!(cert.exists());
        assert!(key.exists());
    }

    #[test]
    fn certs_not_regenerated_if_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FsCertManager::with_dir(tmp.path().to_path_buf());
        let (cert1, _) = mgr.ensure_certs().unwrap();
        let mtime1 = std::fs::metadata(&cert1).unwrap().modified().unwrap();

        let (cert2, _) = mgr.ensure_certs().unwrap();
        let mtime2 = std::fs::metadata(&cert2).unwrap().modified().unwrap();
        assert_eq!(mtime1, mtime2);
    }

    #[test]
    fn load_rustls_config_succeeds_on_generated_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FsCertManager::with_dir(tmp.path().to_path_buf());
        let (cert, key) = mgr.ensure_certs().unwrap();
        let config = mgr.build_rustls_config(&cert, &key);
        assert!(config.is_ok());
    }

    #[test]
    fn is_stale_missing_file() {
        assert!(is_stale(Path::new("/nonexistent/file.pem")));
    }
}
