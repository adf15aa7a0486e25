//! Client credentials
//!
//! A `Credentials` value owns the engine context every session is created
//! from: protocol floor, cipher list, trust anchors and the verifier
//! callbacks. Build one per policy and pass it to `TlsSession::open`.
//!
//! For programs that want a single process-wide store, [`initialize`],
//! [`shared`] and [`teardown`] manage one lazily created instance.

use super::config::TlsConfig;
use super::verify::{self, PeerContext};
use super::{Result, TlsError};
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Trust anchors and verification policy shared by sessions
pub struct Credentials {
    context: SslContext,
    peer_index: Index<Ssl, PeerContext>,
    config: TlsConfig,
}

impl Credentials {
    /// Build a client context from `config`, loading the trust file.
    pub fn new(config: &TlsConfig) -> Result<Self> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())?;

        builder.set_min_proto_version(Some(config.min_version.to_openssl_version()))?;
        builder.set_cipher_list(&config.cipher_list)?;

        builder
            .set_ca_file(&config.ca_file)
            .map_err(|source| TlsError::TrustStore {
                path: config.ca_file.clone(),
                source,
            })?;

        let peer_index = peer_index()?;
        let enforce = config.check_certificate;

        builder.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, ctx| {
            verify::check_certificate(preverify_ok, ctx, peer_index, enforce)
        });

        tracing::debug!(
            ca_file = %config.ca_file.display(),
            check_certificate = enforce,
            min_version = config.min_version.as_str(),
            "TLS credentials loaded"
        );

        Ok(Credentials {
            context: builder.build(),
            peer_index,
            config: config.clone(),
        })
    }

    /// Configuration these credentials were built from
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Whether certificate problems abort the handshake
    pub fn check_certificate(&self) -> bool {
        self.config.check_certificate
    }

    pub(crate) fn context(&self) -> &SslContext {
        &self.context
    }

    pub(crate) fn peer_index(&self) -> Index<Ssl, PeerContext> {
        self.peer_index
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

static PEER_INDEX: OnceLock<Index<Ssl, PeerContext>> = OnceLock::new();

/// Ex-data slot for per-session verifier state, allocated once per process
fn peer_index() -> Result<Index<Ssl, PeerContext>> {
    if let Some(index) = PEER_INDEX.get() {
        return Ok(*index);
    }
    let index = Ssl::new_ex_index::<PeerContext>()?;
    Ok(*PEER_INDEX.get_or_init(|| index))
}

static SHARED: Mutex<Option<Arc<Credentials>>> = Mutex::new(None);

/// Initialize the process-wide credentials, once.
///
/// Concurrent callers serialize on one lock; the first builds the store from
/// its `config`, every later caller gets the same instance and its `config`
/// is ignored. A failed initialization is returned to that caller and
/// leaves the slot empty.
pub fn initialize(config: &TlsConfig) -> Result<Arc<Credentials>> {
    let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(existing) = slot.as_ref() {
        if existing.config() != config {
            tracing::debug!("TLS credentials already initialized, ignoring new configuration");
        }
        return Ok(Arc::clone(existing));
    }

    let credentials = Arc::new(Credentials::new(config)?);
    *slot = Some(Arc::clone(&credentials));
    tracing::info!(ca_file = %config.ca_file.display(), "TLS initialized");
    Ok(credentials)
}

/// The process-wide credentials, if initialized
pub fn shared() -> Option<Arc<Credentials>> {
    SHARED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Release the process-wide credentials.
///
/// Sessions opened earlier keep their own reference to the engine context;
/// only new lookups are affected. Returns whether anything was released.
pub fn teardown() -> bool {
    let released = SHARED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .is_some();
    if released {
        tracing::info!("TLS deinitialized");
    }
    released
}
