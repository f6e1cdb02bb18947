//! CRC-32 verification helper
//!
//! The engine never checks content integrity on its own; callers that
//! want the check wrap the content stream in a [`Crc32Reader`] and
//! compare against the descriptor's expected value once the stream is
//! drained.

use std::io::Read;

/// A `Read` adapter that hashes everything read through it
pub struct Crc32Reader<R: Read> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> Crc32Reader<R> {
    /// Wraps a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// CRC-32 of the bytes read so far
    pub fn sum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Whether the bytes read so far hash to `expected`
    ///
    /// Meaningful only after the stream has been read in full.
    pub fn matches(&self, expected: u32) -> bool {
        self.sum() == expected
    }

    /// Unwraps the adapter, returning the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        let len = self.inner.read(buf)?;
        self.hasher.update(&buf[0..len]);
        Ok(len)
    }
}
