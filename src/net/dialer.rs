//! Dialing with a hard connect timeout and an optional TLS handshake.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::net::backend::Backend;

/// Amount of time to spend trying to establish a single connection,
/// covering both the TCP connect and the TLS handshake when configured.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// One backend socket, plain or wrapped by the caller-provided TLS config.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

pub(crate) async fn dial(backend: &Backend) -> Result<MaybeTlsStream> {
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(backend.addr()))
        .await
        .map_err(|_| Error::DialTimeout {
            backend: backend.to_string(),
        })??;
    stream.set_nodelay(true)?;

    match backend.tls() {
        None => Ok(MaybeTlsStream::Plain(stream)),
        Some(tls) => {
            let connector = TlsConnector::from(tls.config.clone());
            let stream = timeout(
                DIAL_TIMEOUT,
                connector.connect(tls.server_name.clone(), stream),
            )
            .await
            .map_err(|_| Error::DialTimeout {
                backend: backend.to_string(),
            })??;
            Ok(MaybeTlsStream::Tls(Box::new(stream)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_plain_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend = Backend::new(listener.local_addr().unwrap(), 1, None);
        let stream = dial(&backend).await.unwrap();
        assert!(matches!(stream, MaybeTlsStream::Plain(_)));
    }

    #[tokio::test]
    async fn connect_refused_is_an_io_error() {
        // Bind then drop to obtain a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = Backend::new(addr, 1, None);
        assert!(dial(&backend).await.is_err());
    }
}
