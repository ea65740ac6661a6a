//! Byte-stream connections to JRMP endpoints.
//!
//! ## Example
//!
//! ```no_run
//! use rmg::connection::{Connection, Dialer, TcpDialer};
//! use rmg::endpoint::Endpoint;
//! use std::time::Duration;
//!
//! # async fn run() -> std::io::Result<()> {
//! let dialer = TcpDialer::new(Duration::from_secs(3));
//! let mut conn = dialer.dial(&Endpoint::new("127.0.0.1", 1099)).await?;
//! conn.send(b"JRMI\x00\x02\x4b").await?;
//! let mut reply = Vec::new();
//! conn.recv(&mut reply).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::endpoint::Endpoint;

#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;
    /// Appends whatever bytes are available to `buf`. Returns 0 at end of stream.
    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
    async fn shutdown(&mut self) -> io::Result<()>;
}

pub struct Remote<S = TcpStream> {
    stream: S,
}

impl Remote {
    pub async fn new(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl<S> Remote<S> {
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Connection for Remote<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        buf.reserve(4096);
        self.stream.read_buf(buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// Opens connections. Sessions go through this seam so tests can substitute
/// an in-process peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>>;
}

/// Plain TCP, or TLS when the endpoint asks for it.
///
/// TLS connections accept any certificate and any host name. Targets are
/// arbitrary deployments, mostly with self-signed certificates, and the
/// client never sends anything that needs confidentiality.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        debug!(endpoint = %endpoint, "connected");

        if !endpoint.tls {
            return Ok(Box::new(Remote { stream }));
        }

        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let stream = tokio::time::timeout(
            self.connect_timeout,
            connector.connect(&endpoint.host, stream),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))?
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        debug!(endpoint = %endpoint, "TLS established");
        Ok(Box::new(Remote::from_stream(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remote_over_duplex() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = Remote::from_stream(client);

        conn.send(b"JRMI").await.unwrap();
        let mut magic = [0u8; 4];
        server.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, b"JRMI");

        server.write_all(&[0x4E]).await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(conn.recv(&mut buf).await.unwrap(), 1);
        assert_eq!(buf, vec![0x4E]);

        drop(server);
        assert_eq!(conn.recv(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = TcpDialer::new(Duration::from_secs(1));
        assert!(dialer.dial(&Endpoint::new("127.0.0.1", port)).await.is_err());
    }
}
