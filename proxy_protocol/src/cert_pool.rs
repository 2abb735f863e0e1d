//! Lazy, cached per-host leaf certificate issuance for the MitM splice
//! (§4.12). A `CertificatePool` holds the parsed root certificate + key
//! once, mints a leaf the first time a host is requested, and serves every
//! later request for that host from cache.

use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SanType, PKCS_RSA_SHA256,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use time::{Duration, OffsetDateTime};

/// A leaf certificate + private key, both DER-encoded, ready to hand to a
/// `rustls::ServerConfig::with_single_cert`.
#[derive(Clone)]
pub struct IssuedCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
}

#[derive(Debug)]
pub enum CertPoolError {
    RootParse(String),
    Issuance(String),
    HostNotAllowed(String),
}

struct RootKeyMaterial {
    cert: Certificate,
    cert_der: CertificateDer<'static>,
}

/// Thread-safe cache of per-host leaf certificates. Reads (cache hits) take
/// a shared lock; generation and `register_keys` eviction take an
/// exclusive lock. A per-host generation mutex ensures concurrent
/// `value(host)` calls for the same uncached host generate exactly once.
pub struct CertificatePool {
    root: RootKeyMaterial,
    allowed_hosts: RwLock<HashSet<String>>,
    cache: RwLock<HashMap<String, IssuedCert>>,
    generation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CertificatePool {
    /// Parse the root certificate and key once (PEM text) and construct an
    /// empty pool.
    pub fn new(root_cert_pem: &str, root_key_pem: &str) -> Result<Self, CertPoolError> {
        let key_pair = rcgen::KeyPair::from_pem(root_key_pem)
            .map_err(|e| CertPoolError::RootParse(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(root_cert_pem, key_pair)
            .map_err(|e| CertPoolError::RootParse(e.to_string()))?;
        let cert = Certificate::from_params(params).map_err(|e| CertPoolError::RootParse(e.to_string()))?;
        let cert_der = CertificateDer::from(
            cert.serialize_der().map_err(|e| CertPoolError::RootParse(e.to_string()))?,
        );
        Ok(CertificatePool {
            root: RootKeyMaterial { cert, cert_der },
            allowed_hosts: RwLock::new(HashSet::new()),
            cache: RwLock::new(HashMap::new()),
            generation_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root_cert_der(&self) -> CertificateDer<'static> {
        self.root.cert_der.clone()
    }

    /// Atomically replace the allowed-pattern set. Cached entries whose
    /// host no longer matches any pattern are dropped.
    pub fn register_keys(&self, patterns: HashSet<String>) {
        {
            let mut allowed = self.allowed_hosts.write().unwrap();
            *allowed = patterns;
        }
        let allowed = self.allowed_hosts.read().unwrap();
        let mut cache = self.cache.write().unwrap();
        cache.retain(|host, _| allowed.iter().any(|p| host_matches(p, host)));
    }

    /// Fetch (or lazily mint) the leaf certificate for `host`.
    pub fn value(&self, host: &str) -> Result<IssuedCert, CertPoolError> {
        if !self.allowed_hosts.read().unwrap().iter().any(|p| host_matches(p, host)) {
            return Err(CertPoolError::HostNotAllowed(host.to_string()));
        }
        if let Some(hit) = self.cache.read().unwrap().get(host) {
            return Ok(hit.clone());
        }

        let host_lock = {
            let mut locks = self.generation_locks.lock().unwrap();
            locks.entry(host.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = host_lock.lock().unwrap();

        // Re-check the cache: another thread may have generated while we
        // waited on `host_lock`.
        if let Some(hit) = self.cache.read().unwrap().get(host) {
            return Ok(hit.clone());
        }

        let issued = self.issue_leaf(host)?;
        self.cache.write().unwrap().insert(host.to_string(), issued.clone());
        Ok(issued)
    }

    pub fn remove_value(&self, host: &str) {
        self.cache.write().unwrap().remove(host);
    }

    pub fn remove_all_values(&self) {
        self.cache.write().unwrap().clear();
    }

    fn issue_leaf(&self, host: &str) -> Result<IssuedCert, CertPoolError> {
        let apex = apex_of(host);
        let mut params = CertificateParams::new(vec![apex.clone()]);
        params.alg = &PKCS_RSA_SHA256;
        params.key_pair = Some(generate_rsa_key_pair()?);
        params.subject_alt_names = vec![
            SanType::DnsName(apex.clone()),
            SanType::DnsName(format!("*.{apex}")),
        ];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, apex.clone());
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::OcspSigning];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(365);

        let leaf = Certificate::from_params(params).map_err(|e| CertPoolError::Issuance(e.to_string()))?;
        let cert_der = leaf
            .serialize_der_with_signer(&self.root.cert)
            .map_err(|e| CertPoolError::Issuance(e.to_string()))?;
        let key_der = leaf.serialize_private_key_der();

        Ok(IssuedCert { cert_der: CertificateDer::from(cert_der), key_der })
    }
}

/// `*.suffix` matches `x.suffix` but not `suffix` itself; an exact pattern
/// matches only itself. Shared with the MitM splice selector so both use
/// the same hostname-matching rule.
pub(crate) fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host.ends_with(suffix) && host.len() > suffix.len() && host.as_bytes()[host.len() - suffix.len() - 1] == b'.',
        None => pattern == host,
    }
}

/// Mints a fresh 2048-bit RSA key pair for a leaf certificate. rcgen has no
/// RSA keygen of its own (its `ring` backend only generates ECDSA/Ed25519
/// keys), so the key is generated with the `rsa` crate and handed to rcgen
/// as PKCS#8 DER.
fn generate_rsa_key_pair() -> Result<rcgen::KeyPair, CertPoolError> {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
        .map_err(|e| CertPoolError::Issuance(e.to_string()))?;
    let der = private_key
        .to_pkcs8_der()
        .map_err(|e| CertPoolError::Issuance(e.to_string()))?;
    rcgen::KeyPair::from_der(der.as_bytes()).map_err(|e| CertPoolError::Issuance(e.to_string()))
}

/// Last two labels of `host` (`a.b.example.com` -> `example.com`).
fn apex_of(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

#[allow(dead_code)]
pub fn leaf_private_key(issued: &IssuedCert) -> PrivateKeyDer<'static> {
    PrivateKeyDer::try_from(issued.key_der.clone()).expect("rcgen always emits a valid PKCS#8 key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_pattern_matches_subdomain_not_apex() {
        assert!(host_matches("*.example.com", "x.example.com"));
        assert!(!host_matches("*.example.com", "example.com"));
        assert!(!host_matches("*.example.com", "evil-example.com"));
    }

    #[test]
    fn apex_of_keeps_last_two_labels() {
        assert_eq!(apex_of("a.b.example.com"), "example.com");
        assert_eq!(apex_of("example.com"), "example.com");
    }
}
