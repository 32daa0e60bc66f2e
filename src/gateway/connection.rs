//! Lifecycle of the single outbound gateway session.
//!
//! The manager is owned by the delivery worker and never shared. Transport
//! setup is delegated to a [`Connector`] so the same lifecycle logic drives
//! the production TLS session and in-memory streams.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::metrics::GatewayMetrics;

/// Byte stream to the gateway
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> GatewayStream for T {}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("failed to load {path}: {reason}")]
    Credentials { path: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by gateway")]
    Closed,

    #[error("timed out writing to gateway after {0:?}")]
    WriteTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opens transport sessions to the gateway
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session. Does not retry.
    async fn connect(&self) -> Result<Box<dyn GatewayStream>, ConnectionError>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Owns the outbound gateway session
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    stream: Option<Box<dyn GatewayStream>>,
    /// Last successful send, or the connect time if nothing was sent yet
    last_send: Option<Instant>,
    max_age: Duration,
    /// Upper bound on writing one frame
    write_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, max_age: Duration, write_timeout: Duration) -> Self {
        Self {
            connector,
            stream: None,
            last_send: None,
            max_age,
            write_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }

    /// Open a session. On failure the manager stays disconnected.
    #[tracing::instrument(name = "gateway.connect", skip(self), fields(endpoint = %self.connector.endpoint()))]
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.stream.is_some() {
            return Ok(());
        }

        match self.connector.connect().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.last_send = Some(Instant::now());
                GatewayMetrics::record_connect();
                tracing::info!("Connected to gateway");
                Ok(())
            }
            Err(e) => {
                GatewayMetrics::record_connect_failure();
                tracing::error!(error = %e, "Failed to connect to gateway");
                Err(e)
            }
        }
    }

    /// Write the whole frame within the write timeout. Any failure closes
    /// the session.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        let result = tokio::time::timeout(self.write_timeout, async {
            stream.write_all(frame).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.last_send = Some(Instant::now());
                Ok(())
            }
            Ok(Err(e)) => {
                self.close().await;
                Err(e.into())
            }
            Err(_elapsed) => {
                self.close().await;
                Err(ConnectionError::WriteTimeout(self.write_timeout))
            }
        }
    }

    /// Read up to `size` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A reply cut short by a
    /// timeout or end of stream is returned as-is so the caller can reject it.
    /// End of stream with no data and I/O errors close the session.
    pub async fn receive(
        &mut self,
        size: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        let mut buf = vec![0u8; size];
        let mut filled = 0;
        let result = tokio::time::timeout(timeout, async {
            while filled < size {
                let n = stream.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok::<_, io::Error>(())
        })
        .await;

        match result {
            Err(_elapsed) if filled == 0 => Ok(None),
            Ok(Err(e)) => {
                self.close().await;
                Err(e.into())
            }
            Ok(Ok(())) if filled == 0 => {
                self.close().await;
                Err(ConnectionError::Closed)
            }
            _ => {
                buf.truncate(filled);
                Ok(Some(buf))
            }
        }
    }

    /// Tear down the session. Safe to call when already closed.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Best effort: the session is discarded either way
            let _ = tokio::time::timeout(Duration::from_secs(1), stream.shutdown()).await;
            tracing::debug!("Gateway connection closed");
        }
    }

    /// Close the session if it has been idle longer than the configured age.
    ///
    /// Returns true when the session was recycled.
    pub async fn recycle_if_stale(&mut self, now: Instant) -> bool {
        if self.stream.is_none() {
            return false;
        }
        let Some(last_send) = self.last_send else {
            return false;
        };

        let age = now.saturating_duration_since(last_send);
        if age > self.max_age {
            tracing::warn!(
                age_ms = age.as_millis() as u64,
                max_age_ms = self.max_age.as_millis() as u64,
                "Recycling gateway connection"
            );
            self.close().await;
            GatewayMetrics::record_recycle();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connector shared by unit tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use tokio::io::{duplex, DuplexStream};

    use super::*;

    /// Hands out duplex streams; the gateway half of each session is kept
    /// alive so reads time out instead of hitting end of stream.
    #[derive(Default)]
    pub struct ScriptedConnector {
        /// Bytes the gateway writes as soon as the n-th session opens
        scripts: Mutex<VecDeque<Vec<u8>>>,
        gateways: Mutex<Vec<DuplexStream>>,
        connects: AtomicUsize,
        refuse: AtomicBool,
        abandon: AtomicBool,
        stall: AtomicBool,
    }

    impl ScriptedConnector {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_scripts(scripts: Vec<Vec<u8>>) -> Arc<Self> {
            let connector = Self::default();
            *connector.scripts.lock().unwrap() = scripts.into();
            Arc::new(connector)
        }

        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn set_refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Drop the gateway side of new sessions so writes fail
        pub fn set_abandon(&self, abandon: bool) {
            self.abandon.store(abandon, Ordering::SeqCst);
        }

        /// Give new sessions a tiny buffer that the gateway never reads, so
        /// writes block
        pub fn set_stall(&self, stall: bool) {
            self.stall.store(stall, Ordering::SeqCst);
        }

        /// Gateway side of the n-th session
        pub fn take_gateway(&self, index: usize) -> DuplexStream {
            self.gateways.lock().unwrap().remove(index)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn GatewayStream>, ConnectionError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ConnectionError::Connect {
                    endpoint: self.endpoint(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                });
            }

            self.connects.fetch_add(1, Ordering::SeqCst);
            let buffer = if self.stall.load(Ordering::SeqCst) {
                16
            } else {
                64 * 1024
            };
            let (client, mut gateway) = duplex(buffer);
            if self.abandon.load(Ordering::SeqCst) {
                drop(gateway);
                return Ok(Box::new(client));
            }
            let script = self.scripts.lock().unwrap().pop_front();
            if let Some(script) = script {
                gateway.write_all(&script).await?;
            }
            self.gateways.lock().unwrap().push(gateway);
            Ok(Box::new(client))
        }

        fn endpoint(&self) -> String {
            "scripted:0".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedConnector;
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);
    const MAX_AGE: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn test_connect_and_close() {
        let connector = ScriptedConnector::new();
        let mut manager = ConnectionManager::new(connector.clone(), MAX_AGE, TIMEOUT);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(connector.connects(), 1);

        // Connecting again while connected is a no-op
        manager.connect().await.unwrap();
        assert_eq!(connector.connects(), 1);

        manager.close().await;
        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let connector = ScriptedConnector::new();
        connector.set_refuse(true);
        let mut manager = ConnectionManager::new(connector.clone(), MAX_AGE, TIMEOUT);

        let result = manager.connect().await;
        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_writes_whole_frame() {
        let mock = tokio_test::io::Builder::new().write(&[2, 0, 0, 0, 1, 9]).build();
        let mut manager = ConnectionManager::new(ScriptedConnector::new(), MAX_AGE, TIMEOUT);
        manager.stream = Some(Box::new(mock));

        manager.send(&[2, 0, 0, 0, 1, 9]).await.unwrap();
        assert!(manager.last_send().is_some());
    }

    #[tokio::test]
    async fn test_send_failure_closes() {
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken"))
            .build();
        let mut manager = ConnectionManager::new(ScriptedConnector::new(), MAX_AGE, TIMEOUT);
        manager.stream = Some(Box::new(mock));

        assert!(manager.send(&[1, 2, 3]).await.is_err());
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_to_stalled_peer_times_out() {
        // The peer half stays open but nobody reads, so the buffer fills up
        let (client, _peer) = tokio::io::duplex(16);
        let mut manager = ConnectionManager::new(ScriptedConnector::new(), MAX_AGE, TIMEOUT);
        manager.stream = Some(Box::new(client));

        let result = tokio::time::timeout(Duration::from_secs(2), manager.send(&[0u8; 1024]))
            .await
            .expect("send did not honour the write timeout");
        assert!(matches!(result, Err(ConnectionError::WriteTimeout(_))));
        assert!(!manager.is_connected());
        assert!(manager.last_send().is_none());
    }

    #[tokio::test]
    async fn test_send_when_disconnected() {
        let mut manager = ConnectionManager::new(ScriptedConnector::new(), MAX_AGE, TIMEOUT);
        assert!(matches!(
            manager.send(&[1]).await,
            Err(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_receive_times_out_without_data() {
        let connector = ScriptedConnector::new();
        let mut manager = ConnectionManager::new(connector, MAX_AGE, TIMEOUT);
        manager.connect().await.unwrap();

        let reply = manager.receive(6, TIMEOUT).await.unwrap();
        assert!(reply.is_none());
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_receive_exact_reply() {
        let connector = ScriptedConnector::with_scripts(vec![vec![8, 8, 0, 0, 0, 1]]);
        let mut manager = ConnectionManager::new(connector, MAX_AGE, TIMEOUT);
        manager.connect().await.unwrap();

        let reply = manager.receive(6, TIMEOUT).await.unwrap();
        assert_eq!(reply, Some(vec![8, 8, 0, 0, 0, 1]));
    }

    #[tokio::test]
    async fn test_receive_partial_reply_is_returned_short() {
        let connector = ScriptedConnector::with_scripts(vec![vec![8, 8, 0]]);
        let mut manager = ConnectionManager::new(connector, MAX_AGE, TIMEOUT);
        manager.connect().await.unwrap();

        let reply = manager.receive(6, TIMEOUT).await.unwrap();
        assert_eq!(reply, Some(vec![8, 8, 0]));
    }

    #[tokio::test]
    async fn test_receive_end_of_stream_closes() {
        let connector = ScriptedConnector::new();
        let mut manager = ConnectionManager::new(connector.clone(), MAX_AGE, TIMEOUT);
        manager.connect().await.unwrap();
        drop(connector.take_gateway(0));

        let result = manager.receive(6, TIMEOUT).await;
        assert!(matches!(result, Err(ConnectionError::Closed)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_recycle_if_stale() {
        let connector = ScriptedConnector::new();
        let mut manager = ConnectionManager::new(connector, Duration::from_millis(500), TIMEOUT);

        // Nothing to recycle while disconnected
        assert!(!manager.recycle_if_stale(Instant::now()).await);

        manager.connect().await.unwrap();
        manager.send(&[1, 2, 3]).await.unwrap();
        assert!(!manager.recycle_if_stale(Instant::now()).await);
        assert!(manager.is_connected());

        let later = Instant::now() + Duration::from_secs(1);
        assert!(manager.recycle_if_stale(later).await);
        assert!(!manager.is_connected());
    }
}
