//! The server connection owned by the `receive` worker.
//!
//! Connecting happens in [`Lifecycle::prepare`], so every start of the
//! worker opens a fresh connection. The read half is handed to the reader
//! task; the write half stays here behind an async mutex for the sender.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::BotStream;
use super::tls;
use crate::error::BotError;
use crate::options::Options;
use crate::process::Lifecycle;
use crate::shared::SharedData;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Connection {
    options: Options,
    data: SharedData,
    verify_cert: bool,
    backoff: Duration,
    reader: Mutex<Option<ReadHalf<BotStream>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BotStream>>>,
    cancel: Mutex<CancellationToken>,
    /// Set once either half has failed on the current connection.
    failed: AtomicBool,
}

impl Connection {
    pub fn new(options: Options, data: SharedData, verify_cert: bool, backoff: Duration) -> Self {
        Self {
            options,
            data,
            verify_cert,
            backoff,
            reader: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            failed: AtomicBool::new(false),
        }
    }

    async fn connect(&self) -> Result<(), BotError> {
        let address = self.options.address().ok_or_else(|| BotError::Connect {
            address: self.options.string("address").unwrap_or_default(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "invalid address"),
        })?;

        let connect = TcpStream::connect((address.host.as_str(), address.port));
        let tcp = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(source)) => {
                return Err(BotError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(BotError::Connect {
                    address: address.to_string(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let stream = if address.tls {
            BotStream::Tls(Box::new(
                tls::upgrade(tcp, &address.host, self.verify_cert).await?,
            ))
        } else {
            BotStream::Plain(tcp)
        };
        let tls = stream.is_tls();

        let (read, write) = tokio::io::split(stream);
        *self.reader.lock() = Some(read);
        *self.writer.lock().await = Some(write);
        *self.cancel.lock() = CancellationToken::new();
        self.failed.store(false, Ordering::Release);
        self.data.reset_connection();

        info!(address = %address, tls, "Connected");
        Ok(())
    }

    /// Hand the read half to the reader, with the token that cancels it.
    pub fn take_reader(&self) -> Option<(ReadHalf<BotStream>, CancellationToken)> {
        let reader = self.reader.lock().take()?;
        Some((reader, self.cancel.lock().clone()))
    }

    /// Write one already-terminated line.
    pub async fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        };
        writer.write_all(line).await?;
        writer.flush().await
    }

    /// Record an I/O failure. Returns `true` for the first failure on this
    /// connection only, so a restart is requested once even when both
    /// halves fail.
    pub fn report_failure(&self) -> bool {
        !self.failed.swap(true, Ordering::AcqRel)
    }

    /// Shut down the write half, if open.
    async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!(error = %e, "Error shutting down connection");
        }
    }
}

#[async_trait]
impl Lifecycle for Connection {
    async fn prepare(&self) -> Result<(), BotError> {
        self.close().await;
        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, backoff = ?self.backoff, "Connection failed");
                tokio::time::sleep(self.backoff).await;
                Err(e)
            }
        }
    }

    async fn finish(&self) {
        self.cancel.lock().cancel();
        self.reader.lock().take();
        self.close().await;
    }
}
