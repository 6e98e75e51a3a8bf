//! Network provider abstraction.
//!
//! A [`NetworkProvider`] binds and connects [`Endpoint`]s and hands back type
//! erased byte streams, so the transport layer never cares whether a link runs
//! over TCP or a Unix domain socket.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{Endpoint, Protocol};

/// A bidirectional byte stream a link can run over.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased link stream.
pub type BoxedStream = Box<dyn LinkStream>;

/// Provider trait for creating connections and listeners.
///
/// Shared across tasks, hence `Send + Sync`.
#[async_trait]
pub trait NetworkProvider: Send + Sync + 'static {
    /// Start listening on the given endpoint.
    async fn bind(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Listener>>;

    /// Connect to a remote endpoint.
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedStream>;
}

/// Listener that accepts inbound streams.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a single incoming connection.
    ///
    /// Returns the stream and a printable description of the remote side.
    async fn accept(&self) -> io::Result<(BoxedStream, String)>;

    /// Endpoint this listener is bound to.
    ///
    /// For TCP bound to port 0 this carries the port the OS picked.
    fn local_endpoint(&self) -> io::Result<Endpoint>;
}

/// Real Tokio networking implementation.
#[derive(Debug, Clone)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkProvider for TokioNetworkProvider {
    async fn bind(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Listener>> {
        match endpoint.protocol() {
            Protocol::Tcp => {
                let listener = tokio::net::TcpListener::bind(endpoint.location()).await?;
                Ok(Box::new(TokioTcpListener { inner: listener }))
            }
            Protocol::Ipc => bind_ipc(endpoint.location()).await,
        }
    }

    async fn connect(&self, endpoint: &Endpoint) -> io::Result<BoxedStream> {
        match endpoint.protocol() {
            Protocol::Tcp => {
                let stream = tokio::net::TcpStream::connect(endpoint.location()).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            Protocol::Ipc => connect_ipc(endpoint.location()).await,
        }
    }
}

/// Wrapper for Tokio TcpListener to implement our trait.
#[derive(Debug)]
pub struct TokioTcpListener {
    inner: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TokioTcpListener {
    async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr.to_string()))
    }

    fn local_endpoint(&self) -> io::Result<Endpoint> {
        let addr = self.inner.local_addr()?;
        Ok(Endpoint::tcp(addr.ip().to_string(), addr.port()))
    }
}

#[cfg(unix)]
mod ipc {
    use super::*;
    use std::path::PathBuf;

    /// Unix domain socket listener.
    ///
    /// Removes its socket file when dropped.
    #[derive(Debug)]
    pub struct TokioIpcListener {
        pub(super) inner: tokio::net::UnixListener,
        pub(super) path: PathBuf,
    }

    #[async_trait]
    impl Listener for TokioIpcListener {
        async fn accept(&self) -> io::Result<(BoxedStream, String)> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok((Box::new(stream), format!("ipc://{}", self.path.display())))
        }

        fn local_endpoint(&self) -> io::Result<Endpoint> {
            Ok(Endpoint::ipc(self.path.to_string_lossy().into_owned()))
        }
    }

    impl Drop for TokioIpcListener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!("failed to remove ipc socket {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

#[cfg(unix)]
async fn bind_ipc(path: &str) -> io::Result<Box<dyn Listener>> {
    let inner = match tokio::net::UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            // A leftover file from a dead process is reclaimed; a live one is not.
            if tokio::net::UnixStream::connect(path).await.is_ok() {
                return Err(e);
            }
            std::fs::remove_file(path)?;
            tokio::net::UnixListener::bind(path)?
        }
        Err(e) => return Err(e),
    };
    Ok(Box::new(ipc::TokioIpcListener {
        inner,
        path: path.into(),
    }))
}

#[cfg(unix)]
async fn connect_ipc(path: &str) -> io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn bind_ipc(_path: &str) -> io::Result<Box<dyn Listener>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "ipc endpoints require unix domain sockets",
    ))
}

#[cfg(not(unix))]
async fn connect_ipc(_path: &str) -> io::Result<BoxedStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "ipc endpoints require unix domain sockets",
    ))
}
