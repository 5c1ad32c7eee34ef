//! Named transports the database layer can open connections through.
//!
//! - `DirectTransport` - plain TCP to the server (`tcp`)
//! - `TunnelTransport` - a channel through the SSH tunnel (`mysql+tcp`)
//! - `TransportRegistry` - name to transport mapping, built once per run
//! - `TransportRelay` - loopback listener that lets the driver use any transport

mod registry;
mod relay;

pub use registry::TransportRegistry;
pub use relay::TransportRelay;

use crate::error::TransportError;
use crate::services::ssh::SshTunnel;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Name of the direct socket transport.
pub const DIRECT_TRANSPORT: &str = "tcp";
/// Name of the transport that dials through the SSH tunnel.
pub const TUNNEL_TRANSPORT: &str = "mysql+tcp";

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A way to open a byte stream to `host:port`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError>;

    /// True when the driver can connect to the address itself and no relay
    /// is needed.
    fn is_passthrough(&self) -> bool {
        false
    }
}

pub struct DirectTransport;

#[async_trait]
impl Transport for DirectTransport {
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Box::new(stream))
    }

    fn is_passthrough(&self) -> bool {
        true
    }
}

pub struct TunnelTransport {
    tunnel: Arc<SshTunnel>,
}

impl TunnelTransport {
    pub fn new(tunnel: Arc<SshTunnel>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl Transport for TunnelTransport {
    async fn dial(&self, addr: &str) -> Result<BoxedStream, TransportError> {
        let stream = self.tunnel.dial(addr).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_direct_transport_dials_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let transport = DirectTransport;
        assert!(transport.is_passthrough());
        let mut stream = transport.dial(&addr).await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_transport_reports_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = DirectTransport.dial(&addr).await;
        assert!(matches!(result, Err(TransportError::Dial { .. })));
    }
}
