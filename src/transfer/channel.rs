//! Bounded byte channels between transfer stages
//!
//! A `ChunkWriter`/`ChunkReader` pair adapts a bounded `sync_channel` of
//! byte chunks to `Write`/`Read`, so a stage blocks when the next one
//! falls behind and the snapshot is never buffered whole.
//!
//! The writer must be [`finish`](ChunkWriter::finish)ed to signal a clean
//! end of stream. A writer dropped without finishing makes the reader fail
//! instead of returning EOF, so a downstream stage can never mistake an
//! aborted upstream for a complete one.
//!
//! Neither end ever blocks without watching the cancel token: a full
//! channel is retried every [`POLL_INTERVAL`], an empty one is waited on
//! with a timeout, and a tripped token fails the next read even when
//! buffered data remains.

use std::io::{self, Read, Write};
use std::mem;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread;

use crate::cancel::{CancelToken, POLL_INTERVAL};

/// Bytes buffered before a chunk is handed to the next stage
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Chunks in flight between two stages
pub const CHANNEL_DEPTH: usize = 16;

enum Chunk {
    Data(Vec<u8>),
    End,
}

/// Create a connected writer/reader pair
pub fn chunk_channel(cancel: &CancelToken) -> (ChunkWriter, ChunkReader) {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
    (
        ChunkWriter {
            tx,
            buffer: Vec::with_capacity(CHUNK_SIZE),
            bytes: 0,
            peer_closed: false,
            cancel: cancel.clone(),
        },
        ChunkReader {
            rx,
            current: Vec::new(),
            pos: 0,
            done: false,
            upstream_aborted: false,
            cancel: cancel.clone(),
        },
    )
}

fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "transfer cancelled")
}

/// Sending half; implements `Write`
pub struct ChunkWriter {
    tx: SyncSender<Chunk>,
    buffer: Vec<u8>,
    bytes: u64,
    peer_closed: bool,
    cancel: CancelToken,
}

impl ChunkWriter {
    fn send(&mut self, mut chunk: Chunk) -> io::Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled_error());
            }
            match self.tx.try_send(chunk) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    chunk = back;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.peer_closed = true;
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "downstream stage closed",
                    ));
                }
            }
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buffer, Vec::with_capacity(CHUNK_SIZE));
        self.send(Chunk::Data(chunk))
    }

    /// Flush remaining bytes and mark the stream complete
    pub fn finish(mut self) -> io::Result<u64> {
        self.send_buffered()?;
        self.send(Chunk::End)?;
        Ok(self.bytes)
    }

    /// Whether the receiving stage went away
    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buffer.len();
        let take = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);
        self.bytes += take as u64;

        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Receiving half; implements `Read`
pub struct ChunkReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
    done: bool,
    upstream_aborted: bool,
    cancel: CancelToken,
}

impl ChunkReader {
    /// Whether the sending stage went away without finishing
    pub fn upstream_aborted(&self) -> bool {
        self.upstream_aborted
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(cancelled_error());
        }
        while self.pos >= self.current.len() {
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::End) => {
                    self.done = true;
                    return Ok(0);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(cancelled_error());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.upstream_aborted = true;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "upstream stage aborted",
                    ));
                }
            }
        }

        let n = (self.current.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
