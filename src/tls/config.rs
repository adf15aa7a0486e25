//! TLS configuration
//!
//! Plain data describing the client policy. `Credentials::new` turns it into
//! an engine context.

use super::TlsError;
use crate::net::Timeout;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// System trust bundle used when no other file is configured
pub const DEFAULT_CA_FILE: &str = "/etc/ssl/certs/ca-certificates.crt";

/// Default handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the peer's close_notify during shutdown
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine default cipher list (for TLS <= 1.2)
pub const DEFAULT_CIPHER_LIST: &str = "DEFAULT";

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS client configuration (immutable after building)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundle holding the trust anchors
    pub ca_file: PathBuf,
    /// Abort the handshake on certificate problems (false: log and continue)
    pub check_certificate: bool,
    /// Bound for each readiness wait during the handshake
    pub connect_timeout: Timeout,
    /// Bound for the close_notify exchange in `TlsSession::close`
    pub close_timeout: Timeout,
    /// Lowest protocol version offered
    pub min_version: TlsVersion,
    /// OpenSSL cipher list string
    pub cipher_list: String,
}

impl TlsConfig {
    /// Create a new configuration builder
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig {
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
            check_certificate: true,
            connect_timeout: Timeout::After(DEFAULT_CONNECT_TIMEOUT),
            close_timeout: Timeout::After(DEFAULT_CLOSE_TIMEOUT),
            min_version: TlsVersion::Tls12,
            cipher_list: DEFAULT_CIPHER_LIST.to_string(),
        }
    }
}

/// Configuration builder
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    fn new() -> Self {
        TlsConfigBuilder {
            config: TlsConfig::default(),
        }
    }

    /// Trust anchors file (PEM)
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.ca_file = path.as_ref().to_path_buf();
        self
    }

    /// Enable/disable enforcement of certificate checks
    pub fn check_certificate(mut self, enforce: bool) -> Self {
        self.config.check_certificate = enforce;
        self
    }

    /// Handshake timeout
    pub fn connect_timeout(mut self, timeout: Timeout) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Handshake timeout in milliseconds (0 = immediate, negative = infinite)
    pub fn connect_timeout_ms(self, ms: i64) -> Self {
        self.connect_timeout(Timeout::from_millis(ms))
    }

    /// Shutdown timeout
    pub fn close_timeout(mut self, timeout: Timeout) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Minimum protocol version
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.config.min_version = version;
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.config.cipher_list = ciphers.into();
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if self.config.cipher_list.trim().is_empty() {
            return Err(TlsError::InvalidConfig("empty cipher list".to_string()));
        }
        if self.config.ca_file.as_os_str().is_empty() {
            return Err(TlsError::InvalidConfig("empty trust file path".to_string()));
        }
        Ok(self.config)
    }
}
