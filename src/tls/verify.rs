//! Peer certificate verification
//!
//! The engine calls [`check_certificate`] once per certificate in the peer
//! chain and once more for every validation error it finds. Errors are
//! recorded and validation carries on, so every problem with the chain is
//! seen rather than just the first. Whenever the call concerns the leaf
//! (depth 0) the findings so far go to [`verify_peer`], the objections are
//! logged and the enforce/warn policy decides whether validation may go on.
//!
//! [`verify_peer`] itself is a pure function and carries all of the
//! decision logic.

use super::cert;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslRef};
use openssl::stack::StackRef;
use openssl::x509::{X509Ref, X509StoreContext, X509StoreContextRef, X509VerifyResult, X509};
use openssl_sys as ffi;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Why a peer certificate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    ChainUntrusted,
    Revoked,
    UnknownIssuer,
    IssuerNotCa,
    InsecureAlgorithm,
    NotYetValid,
    Expired,
    HostnameMismatch,
    MalformedCertificate,
    NoCertificatePresented,
}

impl RejectReason {
    /// Short identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ChainUntrusted => "chain-untrusted",
            RejectReason::Revoked => "revoked",
            RejectReason::UnknownIssuer => "unknown-issuer",
            RejectReason::IssuerNotCa => "issuer-not-ca",
            RejectReason::InsecureAlgorithm => "insecure-signature-algorithm",
            RejectReason::NotYetValid => "not-yet-valid",
            RejectReason::Expired => "expired",
            RejectReason::HostnameMismatch => "hostname-mismatch",
            RejectReason::MalformedCertificate => "malformed-certificate",
            RejectReason::NoCertificatePresented => "no-certificate-presented",
        }
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            RejectReason::ChainUntrusted => "the certificate is not trusted",
            RejectReason::Revoked => "the certificate has been revoked",
            RejectReason::UnknownIssuer => "the certificate hasn't got a known issuer",
            RejectReason::IssuerNotCa => "the certificate signer was not a CA",
            RejectReason::InsecureAlgorithm => "the certificate was signed using an insecure algorithm",
            RejectReason::NotYetValid => "the certificate is not yet activated",
            RejectReason::Expired => "the certificate has expired",
            RejectReason::HostnameMismatch => "the certificate's owner does not match the hostname",
            RejectReason::MalformedCertificate => "failed to parse the certificate",
            RejectReason::NoCertificatePresented => "no certificate was presented",
        }
    }

    /// Reasons implied by one chain-validation error code.
    ///
    /// Every failure means the chain is untrusted; some codes add a more
    /// specific reason on top.
    pub fn from_verify_code(raw: i32) -> &'static [RejectReason] {
        use RejectReason::*;
        match raw {
            ffi::X509_V_OK => &[],
            ffi::X509_V_ERR_CERT_REVOKED => &[ChainUntrusted, Revoked],
            ffi::X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT
            | ffi::X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY
            | ffi::X509_V_ERR_UNABLE_TO_VERIFY_LEAF_SIGNATURE => &[ChainUntrusted, UnknownIssuer],
            ffi::X509_V_ERR_INVALID_CA => &[ChainUntrusted, IssuerNotCa],
            ffi::X509_V_ERR_EE_KEY_TOO_SMALL
            | ffi::X509_V_ERR_CA_KEY_TOO_SMALL
            | ffi::X509_V_ERR_CA_MD_TOO_WEAK => &[ChainUntrusted, InsecureAlgorithm],
            ffi::X509_V_ERR_CERT_NOT_YET_VALID => &[ChainUntrusted, NotYetValid],
            ffi::X509_V_ERR_CERT_HAS_EXPIRED => &[ChainUntrusted, Expired],
            _ => &[ChainUntrusted],
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error reported by chain validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainError {
    pub depth: u32,
    pub code: i32,
    pub message: String,
}

/// Everything chain validation had to say about the peer chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStatus {
    errors: Vec<ChainError>,
    failure: Option<String>,
}

impl ChainStatus {
    /// Record a validation error reported by the engine
    pub fn record(&mut self, depth: u32, result: X509VerifyResult) {
        self.record_code(depth, result.as_raw(), result.error_string());
    }

    /// Record a validation error by raw `X509_V_ERR_*` code
    pub fn record_code(&mut self, depth: u32, code: i32, message: impl Into<String>) {
        let message = message.into();
        let duplicate = self
            .errors
            .iter()
            .any(|e| e.depth == depth && e.code == code);
        if code != 0 && !duplicate {
            self.errors.push(ChainError { depth, code, message });
        }
    }

    /// Fold one engine callback into the status.
    ///
    /// A failed check that carries no error code still counts as a failure.
    pub fn observe(&mut self, preverify_ok: bool, depth: u32, result: X509VerifyResult) {
        if preverify_ok {
            return;
        }
        if result.as_raw() == ffi::X509_V_OK {
            self.fail(format!("depth {}: validation failed without an error code", depth));
        } else {
            self.record(depth, result);
        }
    }

    /// Validation could not run at all
    pub fn fail(&mut self, message: impl Into<String>) {
        self.failure = Some(message.into());
    }

    /// Errors recorded so far
    pub fn errors(&self) -> &[ChainError] {
        &self.errors
    }

    /// True when validation ran and reported nothing
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.failure.is_none()
    }
}

/// Certificates presented by the peer, DER encoded, leaf first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerChain {
    certs: Vec<Vec<u8>>,
}

impl PeerChain {
    /// Chain from DER blobs, leaf first
    pub fn from_der(certs: Vec<Vec<u8>>) -> Self {
        PeerChain { certs }
    }

    /// Chain from parsed certificates, leaf first
    pub fn from_certs<'a, I>(certs: I) -> Self
    where
        I: IntoIterator<Item = &'a X509Ref>,
    {
        // an entry that fails to encode stays in the chain as an empty blob
        // so the leaf position is preserved and reported as malformed
        let certs = certs
            .into_iter()
            .map(|c| c.to_der().unwrap_or_default())
            .collect();
        PeerChain { certs }
    }

    fn from_stack(stack: &StackRef<X509>) -> Self {
        Self::from_certs(stack.iter())
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn leaf(&self) -> Option<&[u8]> {
        self.certs.first().map(|c| c.as_slice())
    }
}

/// One problem found with the peer certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objection {
    pub reason: RejectReason,
    pub detail: String,
}

impl fmt::Display for Objection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(self.reason.description())
        } else {
            write!(f, "{} ({})", self.reason.description(), self.detail)
        }
    }
}

/// Outcome of verifying a peer certificate
///
/// Empty means accepted. Each reason appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    objections: Vec<Objection>,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.objections.is_empty()
    }

    pub fn objections(&self) -> &[Objection] {
        &self.objections
    }

    pub fn reasons(&self) -> Vec<RejectReason> {
        self.objections.iter().map(|o| o.reason).collect()
    }

    pub fn contains(&self, reason: RejectReason) -> bool {
        self.objections.iter().any(|o| o.reason == reason)
    }

    fn object(&mut self, reason: RejectReason, detail: impl Into<String>) {
        if !self.contains(reason) {
            self.objections.push(Objection {
                reason,
                detail: detail.into(),
            });
        }
    }
}

/// Decide whether the peer chain is acceptable for `hostname` at `now`.
///
/// Every check runs; nothing short-circuits. The validity window is
/// checked against `now` even when chain validation already flagged it.
pub fn verify_peer(chain: &PeerChain, status: &ChainStatus, hostname: &str, now: &Asn1TimeRef) -> Verdict {
    let mut verdict = Verdict::default();

    if let Some(failure) = &status.failure {
        verdict.object(
            RejectReason::ChainUntrusted,
            format!("verification error: {}", failure),
        );
    }
    for error in &status.errors {
        for reason in RejectReason::from_verify_code(error.code) {
            verdict.object(*reason, format!("depth {}: {}", error.depth, error.message));
        }
    }

    let Some(der) = chain.leaf() else {
        verdict.object(RejectReason::NoCertificatePresented, "");
        return verdict;
    };

    let leaf = match X509::from_der(der) {
        Ok(leaf) => leaf,
        Err(e) => {
            verdict.object(RejectReason::MalformedCertificate, e.to_string());
            return verdict;
        }
    };

    let not_before = leaf.not_before();
    let not_after = leaf.not_after();
    if matches!(now.compare(not_before), Ok(Ordering::Less)) {
        verdict.object(
            RejectReason::NotYetValid,
            format!("not before {}, now {}", not_before, now),
        );
    }
    if !matches!(now.compare(not_after), Ok(Ordering::Less)) {
        verdict.object(
            RejectReason::Expired,
            format!("not after {}, now {}", not_after, now),
        );
    }

    if !cert::matches_hostname(&leaf, hostname) {
        verdict.object(
            RejectReason::HostnameMismatch,
            format!(
                "expected '{}', certificate names [{}]",
                hostname,
                cert::presented_names(&leaf).join(", ")
            ),
        );
    }

    verdict
}

/// Per-session verifier state, attached to the engine session as ex-data
pub(crate) struct PeerContext {
    hostname: String,
    status: Mutex<ChainStatus>,
    verdict: Mutex<Option<Verdict>>,
}

impl PeerContext {
    pub(crate) fn new(hostname: &str) -> Self {
        PeerContext {
            hostname: hostname.to_string(),
            status: Mutex::new(ChainStatus::default()),
            verdict: Mutex::new(None),
        }
    }

    /// Verdict of the last verification run for this session, if any
    pub(crate) fn verdict(&self) -> Option<Verdict> {
        lock(&self.verdict).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn peer_context<'a>(ctx: &'a X509StoreContextRef, index: Index<Ssl, PeerContext>) -> Option<&'a PeerContext> {
    let ssl_idx = X509StoreContext::ssl_idx().ok()?;
    let ssl: &SslRef = ctx.ex_data(ssl_idx)?;
    ssl.ex_data(index)
}

/// Engine verify callback, run for every chain certificate and every error.
///
/// Returns whether validation may continue. Under warn-only that is always
/// the case. Under enforce the first rejected leaf verdict stops it.
pub(crate) fn check_certificate(
    preverify_ok: bool,
    ctx: &mut X509StoreContextRef,
    index: Index<Ssl, PeerContext>,
    enforce: bool,
) -> bool {
    let depth = ctx.error_depth();
    let error = ctx.error();

    let accepted = {
        let Some(peer) = peer_context(ctx, index) else {
            tracing::error!(depth, error = %error, "certificate verification without session context");
            return false;
        };

        let mut status = lock(&peer.status);
        status.observe(preverify_ok, depth, error);
        if depth > 0 {
            return true;
        }

        let chain = match ctx.chain() {
            Some(stack) if stack.len() > 0 => PeerChain::from_stack(stack),
            _ => PeerChain::from_certs(ctx.current_cert()),
        };

        let verdict = match Asn1Time::days_from_now(0) {
            Ok(now) => verify_peer(&chain, &status, &peer.hostname, &now),
            Err(e) => {
                tracing::error!(error = %e, "cannot read current time for certificate checks");
                let mut verdict = Verdict::default();
                verdict.object(RejectReason::ChainUntrusted, format!("clock unavailable: {}", e));
                verdict
            }
        };
        drop(status);

        let accepted = verdict.is_accepted();
        let mut stored = lock(&peer.verdict);
        if stored.as_ref() != Some(&verdict) {
            report(&verdict, stored.as_ref(), &peer.hostname, enforce);
            *stored = Some(verdict);
        }
        accepted
    };

    if accepted || !enforce {
        return true;
    }
    if ctx.error() == X509VerifyResult::OK {
        ctx.set_error(X509VerifyResult::APPLICATION_VERIFICATION);
    }
    false
}

/// One log line per new objection: errors when enforcing, warnings otherwise
fn report(verdict: &Verdict, previous: Option<&Verdict>, hostname: &str, enforce: bool) {
    let seen = |objection: &Objection| previous.is_some_and(|p| p.objections().contains(objection));
    for objection in verdict.objections().iter().filter(|o| !seen(*o)) {
        if enforce {
            tracing::error!(
                hostname,
                reason = %objection.reason,
                "{}",
                objection
            );
        } else {
            tracing::warn!(
                hostname,
                reason = %objection.reason,
                "{} (continuing, certificate checks not enforced)",
                objection
            );
        }
    }
}
