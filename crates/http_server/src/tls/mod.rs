//! TLS termination.
//!
//! The engine is rustls, driven entirely through in-memory buffers so it
//! never touches a socket: ciphertext from the transport is staged in a
//! read membrane the engine pulls from, and records the engine emits land
//! in a write membrane the transport drains. The owner of the connection
//! decides when bytes actually move.

use std::path::PathBuf;
use std::time::Duration;

pub(crate) mod connection;
pub(crate) mod context;

pub use connection::{SecureConn, TlsIo, TlsState};
pub use context::TlsContext;

/// Minimum protocol version the server will negotiate.
///
/// rustls implements TLS 1.2 and 1.3; a 1.0 or 1.1 floor therefore admits
/// everything the engine can speak. SSLv2/SSLv3 and TLS compression do not
/// exist in rustls at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// TLS listener settings: PEM material plus negotiation knobs.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub certificate_file: PathBuf,
    pub private_key_file: PathBuf,
    /// Extra PEM certificates appended to the served chain.
    pub certificate_chain_file: Option<PathBuf>,
    pub protocol_version: TlsVersion,
    /// Colon-separated rustls suite names, for example
    /// `TLS13_AES_128_GCM_SHA256:TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`.
    /// Empty keeps the provider default.
    pub cipher_list: String,
    /// Server-side session cache capacity.
    pub session_cache_size: usize,
    /// Advisory lifetime for cached sessions. The in-memory cache evicts
    /// by capacity; entries carry no per-entry clock.
    pub session_timeout: Duration,
}

impl TlsConfig {
    pub fn new(certificate_file: impl Into<PathBuf>, private_key_file: impl Into<PathBuf>) -> Self {
        Self {
            certificate_file: certificate_file.into(),
            private_key_file: private_key_file.into(),
            certificate_chain_file: None,
            protocol_version: TlsVersion::Tls12,
            cipher_list: String::new(),
            session_cache_size: 256,
            session_timeout: Duration::from_secs(300),
        }
    }
}

/// TLS failures, from context initialization through record processing.
///
/// `Protocol` and `Syscall` on a live connection put the bridge in its
/// error state; the connection is then shut down without an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS protocol error: {0}")]
    Protocol(#[from] rustls::Error),
    #[error("TLS transport error: {0}")]
    Syscall(#[from] std::io::Error),
    #[error("cannot send before the handshake completes")]
    NotEstablished,
    #[error("failed to load certificate or key: {0}")]
    Certificate(String),
    #[error("cipher list selects no supported suite: {0}")]
    EmptyCipherList(String),
}
