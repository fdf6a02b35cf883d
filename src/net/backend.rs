//! A backend is one memcached endpoint: a resolved address, the number of
//! pipelined sockets to keep open to it, and an optional prepared TLS
//! client configuration. Address resolution and TLS config construction are
//! the host application's job.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;

/// Prepared TLS material for one backend. The config is built by the caller
/// (roots, client auth, ALPN, ...); the dialer only performs the handshake.
#[derive(Clone)]
pub struct TlsConfig {
    pub config: Arc<rustls::ClientConfig>,
    pub server_name: ServerName<'static>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Backend {
    addr: SocketAddr,
    num_conns: usize,
    tls: Option<TlsConfig>,
}

impl Backend {
    pub fn new(addr: SocketAddr, num_conns: usize, tls: Option<TlsConfig>) -> Self {
        Backend {
            addr,
            num_conns,
            tls,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Requested socket count; the connection list clamps this to >= 1.
    pub fn num_conns(&self) -> usize {
        self.num_conns
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Stable identity of the backend inside the pool map.
    pub(crate) fn key(&self) -> String {
        self.addr.to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}
