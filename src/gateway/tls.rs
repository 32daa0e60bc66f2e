//! TLS transport to the push gateway using a client certificate.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::{TcpSocket, TcpStream};

use super::connection::{ConnectionError, Connector, GatewayStream};
use crate::config::GatewayConfig;

/// Opens TCP+TLS sessions authenticated with the configured client certificate
pub struct TlsConnector {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    connect_timeout: Duration,
    tls: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Build a connector, loading the certificate chain and key up front so
    /// misconfiguration is reported at startup.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConnectionError> {
        let host = config.host().to_string();
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| ConnectionError::Tls(format!("invalid gateway host {}: {}", host, e)))?;

        let cert_chain = load_certs(&config.cert_file)?;
        let key = load_private_key(&config.key_file)?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_file) = &config.ca_file {
            for cert in load_certs(ca_file)? {
                roots
                    .add(cert)
                    .map_err(|e| ConnectionError::Tls(format!("invalid CA certificate: {}", e)))?;
            }
        }

        let tls_config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, key)
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

        Ok(Self {
            host,
            port: config.port,
            server_name,
            connect_timeout: config.read_timeout(),
            tls: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
        })
    }
}

#[async_trait]
impl Connector for TlsConnector {
    async fn connect(&self) -> Result<Box<dyn GatewayStream>, ConnectionError> {
        let endpoint = self.endpoint();

        let tcp = tokio::time::timeout(self.connect_timeout, open_tcp(&self.host, self.port))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout(endpoint.clone()))?
            .map_err(|source| ConnectionError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let stream = tokio::time::timeout(
            self.connect_timeout,
            self.tls.connect(self.server_name.clone(), tcp),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout(endpoint.clone()))?
        .map_err(|source| ConnectionError::Connect { endpoint, source })?;

        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connect to the first reachable address of `host`
async fn open_tcp(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in tokio::net::lookup_host((host, port)).await? {
        match gateway_socket(&addr)?.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "Gateway address unreachable");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", host))
    }))
}

/// Unconnected socket with keepalive so dead peers surface as errors
fn gateway_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;
    // Frames are small and latency matters more than packing
    socket.set_nodelay(true)?;
    Ok(socket)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectionError> {
    let file = open(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| credentials_error(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(credentials_error(path, "no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectionError> {
    let file = open(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| credentials_error(path, e.to_string()))?
        .ok_or_else(|| credentials_error(path, "no private key found".to_string()))
}

fn open(path: &Path) -> Result<File, ConnectionError> {
    File::open(path).map_err(|e| credentials_error(path, e.to_string()))
}

fn credentials_error(path: &Path, reason: String) -> ConnectionError {
    ConnectionError::Credentials {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_certificate_is_reported() {
        let config = GatewayConfig {
            cert_file: "does-not-exist-cert.pem".into(),
            ..GatewayConfig::default()
        };

        match TlsConnector::from_config(&config) {
            Err(ConnectionError::Credentials { path, .. }) => {
                assert_eq!(path, "does-not-exist-cert.pem");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connector built without credentials"),
        }
    }

    #[test]
    fn test_gateway_socket_options() {
        let addr: SocketAddr = "127.0.0.1:2195".parse().unwrap();
        let socket = gateway_socket(&addr).unwrap();
        assert!(socket.keepalive().unwrap());
        assert!(socket.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_open_tcp_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (stream, accepted) = tokio::join!(open_tcp("127.0.0.1", port), listener.accept());
        let stream = stream.unwrap();
        accepted.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_open_tcp_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(open_tcp("127.0.0.1", port).await.is_err());
    }

    #[test]
    fn test_empty_certificate_file_is_rejected() {
        let path = std::env::temp_dir().join("push-relay-empty-cert.pem");
        std::fs::write(&path, b"").unwrap();

        let result = load_certs(&path);
        assert!(matches!(result, Err(ConnectionError::Credentials { .. })));

        let _ = std::fs::remove_file(&path);
    }
}
