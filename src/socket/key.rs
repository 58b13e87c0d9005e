//! Pool keys: which destination an idle socket can be reused for.

use crate::base::neterror::NetError;
use std::fmt;
use url::Url;

/// Transport a pooled socket was established over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    Tls,
}

impl TransportKind {
    /// Transport kind for a URL scheme, if the scheme is one we pool.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" | "ws" => Some(TransportKind::Tcp),
            "https" | "wss" => Some(TransportKind::Tls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a group of interchangeable sockets (transport, host, port).
///
/// The host is lowercased on construction, so keys built from
/// `Example.COM` and `example.com` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    kind: TransportKind,
    host: String,
    port: u16,
}

impl PoolKey {
    pub fn new(kind: TransportKind, host: impl AsRef<str>, port: u16) -> Self {
        Self { kind, host: host.as_ref().to_ascii_lowercase(), port }
    }

    pub fn tcp(host: impl AsRef<str>, port: u16) -> Self {
        Self::new(TransportKind::Tcp, host, port)
    }

    pub fn tls(host: impl AsRef<str>, port: u16) -> Self {
        Self::new(TransportKind::Tls, host, port)
    }

    /// Build a key from a request URL, using the scheme's default port
    /// when none is given.
    pub fn from_url(url: &Url) -> Result<Self, NetError> {
        let kind = TransportKind::from_scheme(url.scheme()).ok_or(NetError::UnknownUrlScheme)?;
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        Ok(Self::new(kind, host, port))
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.kind, self.host, self.port)
    }
}
