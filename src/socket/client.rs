use crate::socket::key::TransportKind;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// An established socket, plain or TLS.
#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    Tls(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    pub fn kind(&self) -> TransportKind {
        match self {
            SocketType::Tcp(_) => TransportKind::Tcp,
            SocketType::Tls(_) => TransportKind::Tls,
        }
    }

    /// The underlying TCP stream. For TLS this is the raw transport under
    /// the session, which is what liveness probes look at.
    ///
    /// A probe on a TLS socket sees ciphertext, so any record the peer sends
    /// after the handshake (a TLS 1.3 NewSessionTicket that was never read,
    /// a close_notify) counts as unexpected data and gets the socket evicted.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            SocketType::Tls(s) => s.get_ref(),
        }
    }
}

impl From<TcpStream> for SocketType {
    fn from(stream: TcpStream) -> Self {
        SocketType::Tcp(stream)
    }
}

impl From<tokio_boring::SslStream<TcpStream>> for SocketType {
    fn from(stream: tokio_boring::SslStream<TcpStream>) -> Self {
        SocketType::Tls(stream)
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketType::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketType::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketType::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketType::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
