//! Newline framing over a byte stream.
//!
//! One frame per `\n`-terminated UTF-8 line. Reads go through
//! `Lines::next_line`, which is cancel-safe, so a read timeout never loses a
//! partially received frame.

use std::io::ErrorKind;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf,
};

use crate::error::{Result, TransportError};

/// One read attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line (terminator stripped)
    Line(String),
    /// Bytes that were not valid UTF-8
    Invalid,
    /// Nothing complete within the timeout
    Idle,
}

/// Line-framed duplex stream
pub struct LineFramed<S> {
    reader: Lines<BufReader<ReadHalf<S>>>,
    writer: WriteHalf<S>,
}

impl<S> LineFramed<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half).lines(),
            writer,
        }
    }

    /// Write one frame followed by `\n`
    pub async fn send_line(&mut self, frame: &str) -> Result<()> {
        let mut buf = BytesMut::with_capacity(frame.len() + 1);
        buf.put_slice(frame.trim_end_matches(['\r', '\n']).as_bytes());
        buf.put_u8(b'\n');
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Wait at most `timeout` for the next line
    ///
    /// EOF and I/O failures are reported as [`TransportError::ConnectionLost`].
    pub async fn recv_line(&mut self, timeout: Duration) -> Result<LineRead> {
        match tokio::time::timeout(timeout, self.reader.next_line()).await {
            Err(_elapsed) => Ok(LineRead::Idle),
            Ok(Ok(Some(line))) => Ok(LineRead::Line(line)),
            Ok(Ok(None)) => Err(TransportError::connection_lost("peer closed the connection")),
            Ok(Err(e)) if e.kind() == ErrorKind::InvalidData => Ok(LineRead::Invalid),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    /// Wait for the next line without a timeout
    pub async fn next_line(&mut self) -> Result<LineRead> {
        match self.reader.next_line().await {
            Ok(Some(line)) => Ok(LineRead::Line(line)),
            Ok(None) => Err(TransportError::connection_lost("peer closed the connection")),
            Err(e) if e.kind() == ErrorKind::InvalidData => Ok(LineRead::Invalid),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
