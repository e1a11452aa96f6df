//! Compression stage codecs

use std::io::{self, Read, Write};

use super::Compressor;
use crate::error::{BackupError, BackupResult};

/// Highest zstd level accepted
pub const ZSTD_MAX_LEVEL: i32 = 22;

/// Streaming zstd
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> BackupResult<u64> {
        let mut encoder = zstd::stream::write::Encoder::new(output, self.level)
            .map_err(|e| BackupError::Compression(format!("zstd encoder: {}", e)))?;

        let consumed = io::copy(input, &mut encoder)
            .map_err(|e| BackupError::Compression(format!("zstd stream: {}", e)))?;

        encoder
            .finish()
            .map_err(|e| BackupError::Compression(format!("zstd finish: {}", e)))?;

        Ok(consumed)
    }
}

/// Pass-through for already compressed or encrypted streams
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCompressor;

impl Compressor for RawCompressor {
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> BackupResult<u64> {
        let copied = io::copy(input, output)
            .map_err(|e| BackupError::Compression(format!("pass-through: {}", e)))?;
        output
            .flush()
            .map_err(|e| BackupError::Compression(format!("pass-through flush: {}", e)))?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_stream_decodes() {
        let data = b"hello world repeated hello world repeated ".repeat(1000);
        let mut out = Vec::new();

        let consumed = ZstdCompressor::new(3)
            .compress(&mut &data[..], &mut out)
            .unwrap();

        assert_eq!(consumed, data.len() as u64);
        assert!(out.len() < data.len() / 2);
        assert_eq!(zstd::decode_all(&out[..]).unwrap(), data);
    }

    #[test]
    fn test_raw_is_identity() {
        let data = vec![42u8; 10_000];
        let mut out = Vec::new();

        RawCompressor.compress(&mut &data[..], &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_input_error_propagates() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "upstream stage aborted"))
            }
        }

        let mut out = Vec::new();
        let err = ZstdCompressor::new(1)
            .compress(&mut Failing, &mut out)
            .unwrap_err();
        assert!(matches!(err, BackupError::Compression(_)));
    }
}
