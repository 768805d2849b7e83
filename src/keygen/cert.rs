//! Purpose: Self-signed TLS certificate generation and certificate chain pinning hashes.
//! Exports: `CertificateOptions`, `generate_certificate`, `cert_chain_hash`.
//! Role: Produces material for engine TLS settings (`certificates`,
//! `pinnedPeerCertificateChainSha256`).
//! Invariants: Chain hash folds certificates in PEM order: h1 = sha256(c1),
//! hn = sha256(h(n-1) || sha256(cn)).
use std::io::Cursor;
use std::net::IpAddr;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, DnValue, IsCa,
    KeyUsagePurpose, SanType,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::core::error::{Error, ErrorKind};
use crate::core::response::join_fields;

const DEFAULT_EXPIRE_HOURS: u32 = 90 * 24;
const PEM_MARKER: &str = "-----BEGIN";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CertificateOptions {
    /// DNS names or IP addresses placed in the subject alternative names.
    pub domains: Vec<String>,
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub is_ca: bool,
    /// Validity in hours from now; defaults to 90 days.
    pub expire_hours: Option<u32>,
}

/// Returns `cert_pem|key_pem`.
pub fn generate_certificate(options: &CertificateOptions) -> Result<String, Error> {
    let expire_hours = options.expire_hours.unwrap_or(DEFAULT_EXPIRE_HOURS);
    if expire_hours == 0 {
        return Err(
            Error::new(ErrorKind::Certificate).with_message("expiry must be at least one hour")
        );
    }
    if options.domains.is_empty() && options.common_name.is_none() {
        return Err(Error::new(ErrorKind::Certificate)
            .with_message("certificate needs at least one domain or a common name"));
    }

    let mut params = CertificateParams::new(Vec::<String>::new());
    params.subject_alt_names = options
        .domains
        .iter()
        .map(|name| match name.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(name.clone()),
        })
        .collect();

    let mut subject = DistinguishedName::new();
    if let Some(common_name) = &options.common_name {
        subject.push(DnType::CommonName, DnValue::Utf8String(common_name.clone()));
    }
    if let Some(organization) = &options.organization {
        subject.push(DnType::OrganizationName, DnValue::Utf8String(organization.clone()));
    }
    params.distinguished_name = subject;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::hours(i64::from(expire_hours));

    if options.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
    }

    let cert = Certificate::from_params(params).map_err(|err| {
        Error::new(ErrorKind::Certificate)
            .with_message("failed to generate certificate")
            .with_source(err)
    })?;
    let cert_pem = cert.serialize_pem().map_err(|err| {
        Error::new(ErrorKind::Certificate)
            .with_message("failed to encode certificate")
            .with_source(err)
    })?;
    let key_pem = cert.serialize_private_key_pem();
    Ok(join_fields(&[&cert_pem, &key_pem]))
}

/// Accepts PEM text directly, or a path to a PEM file.
pub fn cert_chain_hash(pem_or_path: &str) -> Result<String, Error> {
    let pem = if pem_or_path.contains(PEM_MARKER) {
        pem_or_path.as_bytes().to_vec()
    } else {
        let path = Path::new(pem_or_path.trim());
        std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Certificate)
                .with_message(format!("failed to read certificate file {}", path.display()))
                .with_source(err)
        })?
    };

    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Certificate)
                .with_message("failed to parse certificate PEM")
                .with_source(err)
        })?;
    let Some((leaf, rest)) = certs.split_first() else {
        return Err(Error::new(ErrorKind::Certificate).with_message("no certificates found"));
    };

    let mut chain: [u8; 32] = Sha256::digest(leaf).into();
    for cert in rest {
        let mut hasher = Sha256::new();
        hasher.update(chain);
        hasher.update(Sha256::digest(cert));
        chain = hasher.finalize().into();
    }
    Ok(STANDARD.encode(chain))
}

#[cfg(test)]
mod tests {
    use super::{CertificateOptions, cert_chain_hash, generate_certificate};
    use crate::core::error::ErrorKind;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use sha2::{Digest, Sha256};
    use std::io::Cursor;

    fn options(domains: &[&str]) -> CertificateOptions {
        CertificateOptions {
            domains: domains.iter().map(|domain| domain.to_string()).collect(),
            ..CertificateOptions::default()
        }
    }

    fn der(pem: &str) -> Vec<Vec<u8>> {
        rustls_pemfile::certs(&mut Cursor::new(pem.as_bytes()))
            .map(|cert| cert.expect("cert").to_vec())
            .collect()
    }

    #[test]
    fn generates_cert_and_key_pem() {
        let output = generate_certificate(&options(&["example.test", "127.0.0.1"])).expect("cert");
        let (cert, key) = output.split_once('|').expect("two fields");
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY-----"));
        assert_eq!(der(cert).len(), 1);
    }

    #[test]
    fn options_parse_from_camel_case_json() {
        let parsed: CertificateOptions = serde_json::from_str(
            r#"{"domains": ["a.test"], "commonName": "A", "isCa": true, "expireHours": 24}"#,
        )
        .expect("json");
        assert_eq!(parsed.common_name.as_deref(), Some("A"));
        assert!(parsed.is_ca);
        assert_eq!(parsed.expire_hours, Some(24));
        let cert = generate_certificate(&parsed).expect("ca cert");
        assert!(cert.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn rejects_empty_subject_and_zero_expiry() {
        let err = generate_certificate(&CertificateOptions::default()).expect_err("no names");
        assert_eq!(err.kind(), ErrorKind::Certificate);
        let mut zero = options(&["a.test"]);
        zero.expire_hours = Some(0);
        assert_eq!(
            generate_certificate(&zero).expect_err("zero expiry").kind(),
            ErrorKind::Certificate
        );
    }

    #[test]
    fn chain_hash_folds_in_order() {
        let first = generate_certificate(&options(&["leaf.test"])).expect("leaf");
        let second = generate_certificate(&options(&["ca.test"])).expect("ca");
        let leaf_pem = first.split_once('|').expect("fields").0;
        let ca_pem = second.split_once('|').expect("fields").0;

        let single = cert_chain_hash(leaf_pem).expect("single");
        let leaf_der = der(leaf_pem).remove(0);
        assert_eq!(single, STANDARD.encode(Sha256::digest(&leaf_der)));

        let chain_pem = format!("{leaf_pem}{ca_pem}");
        let chained = cert_chain_hash(&chain_pem).expect("chain");
        let ca_der = der(ca_pem).remove(0);
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(&leaf_der));
        hasher.update(Sha256::digest(&ca_der));
        assert_eq!(chained, STANDARD.encode(hasher.finalize()));

        let reversed = cert_chain_hash(&format!("{ca_pem}{leaf_pem}")).expect("reversed");
        assert_ne!(chained, reversed);
    }

    #[test]
    fn chain_hash_reads_files() {
        let output = generate_certificate(&options(&["file.test"])).expect("cert");
        let pem = output.split_once('|').expect("fields").0;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chain.pem");
        std::fs::write(&path, pem).expect("write");
        assert_eq!(
            cert_chain_hash(path.to_str().expect("utf8 path")).expect("file"),
            cert_chain_hash(pem).expect("text")
        );

        let missing = dir.path().join("missing.pem");
        let err = cert_chain_hash(missing.to_str().expect("utf8 path")).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Certificate);
        let err = cert_chain_hash("-----BEGIN nothing useful").expect_err("no certs");
        assert_eq!(err.kind(), ErrorKind::Certificate);
    }
}
