//! Transport establishment: TCP with optional TLS

use crate::{
    config::ManagerConfig,
    error::{AmiError, AmiResult},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Byte stream a connection runs over.
pub trait AmiStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AmiStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn AmiStream>;

/// Transport factory used by [`Manager::connect`](crate::Manager::connect).
///
/// Replace it to run over something other than TCP, e.g. an in-memory duplex
/// pipe in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new stream to the server described by `config`.
    async fn connect(&self, config: &ManagerConfig) -> AmiResult<BoxedStream>;
}

/// Default connector: TCP, wrapped in TLS when `config.ssl` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(config: &ManagerConfig) -> AmiResult<TcpStream> {
    let timeout_ms = config.connect_timeout_ms;
    let tcp_result = timeout(
        config.connect_timeout(),
        TcpStream::connect((config.host.as_str(), config.port)),
    )
    .await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AmiError::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(AmiError::Timeout { timeout_ms })
        }
    }
}

fn tls_client_config() -> rustls::ClientConfig {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &ManagerConfig) -> AmiResult<BoxedStream> {
        let tcp = tcp_connect_with_timeout(config).await?;
        if !config.ssl {
            return Ok(Box::new(tcp));
        }

        let connector = TlsConnector::from(Arc::new(tls_client_config()));
        let server_name = rustls::pki_types::ServerName::try_from(config.host.clone()).map_err(
            |e| AmiError::Tls {
                message: format!("invalid server name '{}': {}", config.host, e),
            },
        )?;
        let tls = timeout(config.connect_timeout(), connector.connect(server_name, tcp))
            .await
            .map_err(|_| AmiError::Timeout {
                timeout_ms: config.connect_timeout_ms,
            })?
            .map_err(|e| AmiError::Tls {
                message: format!("handshake with {} failed: {}", config.host, e),
            })?;
        debug!("[CONNECT] TLS handshake complete");
        Ok(Box::new(tls))
    }
}
