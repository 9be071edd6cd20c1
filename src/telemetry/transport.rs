//! Transport adapters feeding raw text chunks to the framer.
//!
//! A transport is opened once per session, read until it reports end of
//! stream, and closed. Reads must be cancel-safe: the session drops a
//! pending `next_chunk` future when the user disconnects.

use crate::error::{TelemetryError, TelemetryResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Size of a single read from byte-oriented transports.
const READ_BUFFER_SIZE: usize = 1024;

/// Source of telemetry text.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying link.
    ///
    /// Returns `TelemetryError::Cancelled` when the user backs out of the
    /// attempt, which the lifecycle treats as a silent return to idle.
    async fn open(&mut self) -> TelemetryResult<()>;

    /// Next chunk of text, or `None` once the stream has ended.
    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>>;

    /// Release the link. Called exactly once after a successful open.
    async fn close(&mut self) -> TelemetryResult<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Transport over any already-open async byte stream (stdin, a socket, a file).
pub struct ReaderTransport<R> {
    label: String,
    reader: Option<R>,
    /// Trailing bytes of a UTF-8 sequence split across reads
    pending: Vec<u8>,
}

impl<R> ReaderTransport<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(label: impl Into<String>, reader: R) -> Self {
        Self {
            label: label.into(),
            reader: Some(reader),
            pending: Vec::new(),
        }
    }

    /// Decode as much of `pending` as forms complete UTF-8, keeping the rest.
    ///
    /// Invalid bytes become U+FFFD. A sequence cut off at the end of the
    /// buffer stays pending until the next read completes it.
    fn take_text(&mut self) -> String {
        let mut text = String::new();
        let mut start = 0;

        while start < self.pending.len() {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..valid_end]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + bad;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..start);
        text
    }
}

#[async_trait]
impl<R> Transport for ReaderTransport<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn open(&mut self) -> TelemetryResult<()> {
        if self.reader.is_none() {
            return Err(TelemetryError::Transport(format!(
                "{} has already been closed",
                self.label
            )));
        }
        Ok(())
    }

    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if self.pending.is_empty() {
                return Ok(None);
            }
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            return Ok(Some(tail));
        }

        self.pending.extend_from_slice(&buf[..n]);
        Ok(Some(self.take_text()))
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        self.reader = None;
        self.pending.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Replays a captured telemetry file.
pub struct FileTransport {
    path: PathBuf,
    inner: Option<ReaderTransport<tokio::fs::File>>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: None,
        }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn open(&mut self) -> TelemetryResult<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            TelemetryError::Transport(format!("Failed to open {}: {e}", self.path.display()))
        })?;
        self.inner = Some(ReaderTransport::new(self.describe(), file));
        Ok(())
    }

    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>> {
        match self.inner.as_mut() {
            Some(inner) => inner.next_chunk().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.close().await?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// How an in-memory transport answers `open`.
#[derive(Debug, Clone)]
enum OpenOutcome {
    Ready,
    Fail(String),
    Cancel,
}

/// In-memory transport driven through a [`ChunkSender`].
///
/// Used by embedders that already own the I/O (e.g. a WebSerial bridge)
/// and by tests.
pub struct ChannelTransport {
    receiver: mpsc::Receiver<Result<String, String>>,
    outcome: OpenOutcome,
    closed: bool,
}

/// Feeding half of a [`ChannelTransport`]. Dropping it ends the stream.
#[derive(Clone)]
pub struct ChunkSender {
    sender: mpsc::Sender<Result<String, String>>,
}

impl ChunkSender {
    /// Deliver a chunk. Returns false once the session has gone away.
    pub async fn send(&self, chunk: impl Into<String>) -> bool {
        self.sender.send(Ok(chunk.into())).await.is_ok()
    }

    /// Simulate a link failure on the next read.
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.sender.send(Err(reason.into())).await.is_ok()
    }
}

impl ChannelTransport {
    pub fn pair(capacity: usize) -> (Self, ChunkSender) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                receiver,
                outcome: OpenOutcome::Ready,
                closed: false,
            },
            ChunkSender { sender },
        )
    }

    /// A transport whose `open` fails with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        let (mut transport, _) = Self::pair(1);
        transport.outcome = OpenOutcome::Fail(reason.into());
        transport
    }

    /// A transport whose `open` reports a user cancellation.
    pub fn cancelled() -> Self {
        let (mut transport, _) = Self::pair(1);
        transport.outcome = OpenOutcome::Cancel;
        transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&mut self) -> TelemetryResult<()> {
        match &self.outcome {
            OpenOutcome::Ready => Ok(()),
            OpenOutcome::Fail(reason) => Err(TelemetryError::Transport(reason.clone())),
            OpenOutcome::Cancel => Err(TelemetryError::Cancelled),
        }
    }

    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>> {
        match self.receiver.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(reason)) => Err(TelemetryError::Transport(reason)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        self.receiver.close();
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory channel".to_string()
    }
}
