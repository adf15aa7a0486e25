//! Certificate handling and parsing
//!
//! Extracts subject, issuer, alternative names and validity from X.509
//! certificates, and matches certificate names against a target hostname.

use openssl::asn1::Asn1StringRef;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One subject alternative name entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAltName {
    Dns(String),
    Ip(IpAddr),
}

impl fmt::Display for SubjectAltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectAltName::Dns(name) => write!(f, "DNS:{}", name),
            SubjectAltName::Ip(ip) => write!(f, "IP:{}", ip),
        }
    }
}

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<SubjectAltName>,
    /// Start of the validity window, as printed by OpenSSL
    pub not_before: String,
    /// End of the validity window, as printed by OpenSSL
    pub not_after: String,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()).unwrap_or_else(|| "<undef>".to_string()),
            issuer: common_name(cert.issuer_name()).unwrap_or_else(|| "<undef>".to_string()),
            subject_alt_names: subject_alt_names(cert),
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
        }
    }
}

/// Get Common Name from X509_NAME
fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| name_text(entry.data()))
}

/// Decode a name entry in full; entries with an embedded NUL are refused.
fn name_text(data: &Asn1StringRef) -> Option<String> {
    let text = data.to_string().ok()?;
    if text.contains('\0') {
        return None;
    }
    Some(text)
}

/// Get Subject Alternative Names (DNS and IP entries only)
pub fn subject_alt_names(cert: &X509Ref) -> Vec<SubjectAltName> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext.iter() {
            if let Some(dns) = name.dnsname() {
                names.push(SubjectAltName::Dns(dns.to_string()));
            } else if let Some(ip) = name.ipaddress() {
                if let Some(ip) = ip_from_bytes(ip) {
                    names.push(SubjectAltName::Ip(ip));
                }
            }
        }
    }

    names
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Names the certificate is issued for, as used by [`matches_hostname`]
///
/// DNS alternative names when present, otherwise the subject Common Name.
pub fn presented_names(cert: &X509Ref) -> Vec<String> {
    let sans = subject_alt_names(cert);
    let has_dns = sans.iter().any(|n| matches!(n, SubjectAltName::Dns(_)));

    let mut names: Vec<String> = sans.iter().map(|n| n.to_string()).collect();
    if !has_dns {
        if let Some(cn) = common_name(cert.subject_name()) {
            names.push(format!("CN:{}", cn));
        }
    }
    names
}

/// Check whether `cert` was issued for `hostname`.
///
/// IP literals only match IP alternative names. DNS hostnames match DNS
/// alternative names, falling back to the subject Common Name only when the
/// certificate carries no DNS alternative name at all.
pub fn matches_hostname(cert: &X509Ref, hostname: &str) -> bool {
    let host = normalize(hostname);
    if host.is_empty() {
        return false;
    }

    let sans = subject_alt_names(cert);

    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return sans.iter().any(|n| *n == SubjectAltName::Ip(ip));
    }

    let dns: Vec<&str> = sans
        .iter()
        .filter_map(|n| match n {
            SubjectAltName::Dns(name) => Some(name.as_str()),
            SubjectAltName::Ip(_) => None,
        })
        .collect();

    if !dns.is_empty() {
        return dns.iter().any(|pattern| dns_name_matches(pattern, &host));
    }

    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .filter_map(|entry| name_text(entry.data()))
        .any(|cn| dns_name_matches(&cn, &host))
}

/// Match one certificate DNS name against a hostname.
///
/// `*` is only honoured as the complete left-most label and stands for
/// exactly one non-empty label; `*.com` style patterns never match.
pub fn dns_name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = normalize(pattern);
    let host = normalize(hostname);

    if pattern.is_empty() || host.is_empty() || host.contains('*') {
        return false;
    }
    if pattern.contains('\0') || host.contains('\0') {
        return false;
    }

    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            if !suffix.contains('.') || suffix.contains('*') {
                return false;
            }
            match host.split_once('.') {
                Some((first, rest)) => !first.is_empty() && rest == suffix,
                None => false,
            }
        }
        None => pattern == host,
    }
}

fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
