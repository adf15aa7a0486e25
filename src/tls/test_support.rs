//! Test PKI and TLS test servers
//!
//! Shared with the integration tests through `#[path]`, so this file only
//! depends on `openssl` and `tempfile`.

#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};
use openssl::ssl::{SslAcceptor, SslMethod, SslStream};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

const DAY: i64 = 24 * 60 * 60;

/// Description of a certificate to generate
pub struct CertSpec {
    cn: String,
    dns: Vec<String>,
    ips: Vec<String>,
    is_ca: bool,
    valid_from_days: i64,
    valid_to_days: i64,
}

impl CertSpec {
    /// End-entity certificate valid from yesterday for 30 days
    pub fn leaf(cn: &str) -> Self {
        CertSpec {
            cn: cn.to_string(),
            dns: Vec::new(),
            ips: Vec::new(),
            is_ca: false,
            valid_from_days: -1,
            valid_to_days: 30,
        }
    }

    /// CA certificate valid from yesterday for a year
    pub fn ca(cn: &str) -> Self {
        CertSpec {
            is_ca: true,
            valid_to_days: 365,
            ..CertSpec::leaf(cn)
        }
    }

    pub fn sans(mut self, names: &[&str]) -> Self {
        self.dns = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn ips(mut self, ips: &[&str]) -> Self {
        self.ips = ips.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Validity window in days relative to now (negative is in the past)
    pub fn valid_days(mut self, from: i64, to: i64) -> Self {
        self.valid_from_days = from;
        self.valid_to_days = to;
        self
    }

    pub fn self_signed(self) -> (X509, PKey<Private>) {
        let key = generate_key();
        let cert = self.build(&key, None, &key);
        (cert, key)
    }

    pub fn signed_by(self, issuer: &X509Ref, issuer_key: &PKeyRef<Private>) -> (X509, PKey<Private>) {
        let key = generate_key();
        let cert = self.build(&key, Some(issuer), issuer_key);
        (cert, key)
    }

    fn build(&self, key: &PKeyRef<Private>, issuer: Option<&X509Ref>, signing_key: &PKeyRef<Private>) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, &self.cn).unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let not_before = Asn1Time::from_unix(now + self.valid_from_days * DAY).unwrap();
        let not_after = Asn1Time::from_unix(now + self.valid_to_days * DAY).unwrap();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        match issuer {
            Some(issuer) => builder.set_issuer_name(issuer.subject_name()).unwrap(),
            None => builder.set_issuer_name(&name).unwrap(),
        }
        builder.set_pubkey(key).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        if self.is_ca {
            builder
                .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
                .unwrap();
            builder
                .append_extension(
                    KeyUsage::new()
                        .critical()
                        .key_cert_sign()
                        .crl_sign()
                        .build()
                        .unwrap(),
                )
                .unwrap();
        } else {
            builder
                .append_extension(BasicConstraints::new().build().unwrap())
                .unwrap();
        }

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(issuer, None))
            .unwrap();
        builder.append_extension(ski).unwrap();

        if issuer.is_some() {
            let aki = AuthorityKeyIdentifier::new()
                .keyid(false)
                .build(&builder.x509v3_context(issuer, None))
                .unwrap();
            builder.append_extension(aki).unwrap();
        }

        if !self.dns.is_empty() || !self.ips.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for dns in &self.dns {
                san.dns(dns);
            }
            for ip in &self.ips {
                san.ip(ip);
            }
            let san = san.build(&builder.x509v3_context(issuer, None)).unwrap();
            builder.append_extension(san).unwrap();
        }

        builder.sign(signing_key, MessageDigest::sha256()).unwrap();
        builder.build()
    }
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// A test CA plus a PEM trust file holding it
pub struct TestPki {
    pub ca: X509,
    pub ca_key: PKey<Private>,
    trust_file: NamedTempFile,
}

impl TestPki {
    pub fn new() -> Self {
        let (ca, ca_key) = CertSpec::ca("vtls Test CA").self_signed();
        let mut trust_file = NamedTempFile::new().unwrap();
        trust_file.write_all(&ca.to_pem().unwrap()).unwrap();
        trust_file.flush().unwrap();
        TestPki {
            ca,
            ca_key,
            trust_file,
        }
    }

    pub fn trust_file(&self) -> &Path {
        self.trust_file.path()
    }

    /// Issue a certificate from this CA
    pub fn issue(&self, spec: CertSpec) -> (X509, PKey<Private>) {
        spec.signed_by(&self.ca, &self.ca_key)
    }
}

/// Accept one TLS connection on a fresh loopback port and run `handler`.
///
/// The join handle yields `None` when the TLS accept failed, e.g. because
/// the client aborted the handshake.
pub fn spawn_tls_server<F, T>(cert: X509, key: PKey<Private>, handler: F) -> (SocketAddr, JoinHandle<Option<T>>)
where
    F: FnOnce(SslStream<TcpStream>) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_private_key(&key).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        let acceptor = acceptor.build();

        let (tcp_stream, _) = listener.accept().unwrap();
        acceptor.accept(tcp_stream).ok().map(handler)
    });

    (addr, handle)
}
