// ============================================================================
// TCP Ledger Backend
// ============================================================================
//
// One persistent connection to the ledger, used one batch at a time.
//
// Request:  op (u8) | count (u32 LE) | count x 128-byte transfer records
// Response: count (u32 LE) | count x result code (u32 LE)
//
// Any I/O or framing error drops the connection; the next batch reconnects.
// The failed batch itself is not retried.
//
// Every (re)connect resolves the host through the injected `NameResolver`
// and tries each address in turn within the connect timeout.
//
// ============================================================================

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::codec::{self, EncodedOperation, RESULT_SIZE};
use super::{LedgerBackend, LedgerError, OperationKind, TransferResult};
use crate::config::LedgerConfig;
use crate::telemetry::{NameResolver, resolve};

pub struct TcpLedgerBackend {
    host: String,
    port: u16,
    connect_timeout: Duration,
    resolver: Arc<dyn NameResolver>,
    connection: Mutex<Option<TcpStream>>,
}

impl TcpLedgerBackend {
    /// Connects eagerly so an unreachable ledger fails startup.
    pub async fn connect(config: &LedgerConfig, resolver: Arc<dyn NameResolver>) -> Result<Self> {
        let backend = Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
            resolver,
            connection: Mutex::new(None),
        };

        let stream = backend
            .open()
            .await
            .with_context(|| format!("Failed to connect to ledger at {}", config.address()))?;
        info!(addr = %config.address(), "Connected to ledger");
        *backend.connection.lock().await = Some(stream);

        Ok(backend)
    }

    async fn open(&self) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, async {
            let addrs = resolve(self.resolver.as_ref(), &self.host, self.port).await?;
            connect_any(&addrs).await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn round_trip(
        stream: &mut TcpStream,
        kind: OperationKind,
        batch: &[EncodedOperation],
    ) -> Result<Vec<TransferResult>, LedgerError> {
        let frame = codec::request_frame(kind, batch)?;
        stream.write_all(&frame).await.map_err(unavailable)?;
        stream.flush().await.map_err(unavailable)?;

        let count = stream.read_u32_le().await.map_err(unavailable)? as usize;
        if count != batch.len() {
            return Err(LedgerError::ResultCountMismatch {
                expected: batch.len(),
                actual: count,
            });
        }

        let mut body = vec![0u8; count * RESULT_SIZE];
        stream.read_exact(&mut body).await.map_err(unavailable)?;
        codec::decode_results(&body)
    }
}

#[async_trait]
impl LedgerBackend for TcpLedgerBackend {
    async fn submit(
        &self,
        kind: OperationKind,
        batch: Vec<EncodedOperation>,
    ) -> Result<Vec<TransferResult>, LedgerError> {
        let mut connection = self.connection.lock().await;

        let mut stream = match connection.take() {
            Some(stream) => stream,
            None => {
                debug!(host = %self.host, port = self.port, "Reconnecting to ledger");
                self.open().await.map_err(unavailable)?
            }
        };

        match Self::round_trip(&mut stream, kind, &batch).await {
            Ok(results) => {
                *connection = Some(stream);
                Ok(results)
            }
            Err(e) => {
                // Stream state is unknown after a partial exchange
                warn!(host = %self.host, port = self.port, error = %e, "Dropping ledger connection");
                Err(e)
            }
        }
    }
}

/// First address that accepts, or the last error
async fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Ledger address refused");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no ledger address")))
}

fn unavailable(e: io::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}
