//! Negotiated session parameters
//!
//! Snapshot of what the handshake settled on, for logging and inspection.

use super::cert::CertInfo;
use openssl::ssl::{NameType, SslRef};

/// Session parameters available after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent to the peer
    pub servername: Option<String>,

    /// Engine chain-validation result
    pub verify_result: String,

    /// Peer certificate chain (index 0 is the leaf)
    pub cert_chain: Vec<CertInfo>,
}

impl SessionInfo {
    /// Collect session parameters from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        let cipher = ssl
            .current_cipher()
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "<undef>".to_string());

        let cert_chain = match ssl.peer_cert_chain() {
            Some(chain) if chain.len() > 0 => chain.iter().map(CertInfo::from_x509).collect(),
            _ => ssl
                .peer_certificate()
                .map(|cert| vec![CertInfo::from_x509(&cert)])
                .unwrap_or_default(),
        };

        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher,
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            verify_result: ssl.verify_result().error_string().to_string(),
            cert_chain,
        }
    }

    /// Peer leaf certificate
    pub fn peer_cert(&self) -> Option<&CertInfo> {
        self.cert_chain.first()
    }
}
