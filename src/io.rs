//! `std::io` adapters that run a [`ChunkFilter`] over a stream.
//!
//! ```rust
//! use std::io::Read;
//!
//! use chunk_transcode::io::FilterReader;
//! use chunk_transcode::LineEndingFilter;
//!
//! let filter = LineEndingFilter::from_names("LF", Some("CRLF"))?;
//! let mut reader = FilterReader::new(&b"a\r\n"[..], filter);
//! let mut out = String::new();
//! reader.read_to_string(&mut out)?;
//! assert_eq!(out, "a\n");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read, Write};

use tracing::warn;

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::filter::{ChunkFilter, Step};

/// Reads from `R` in fixed-size chunks and yields the filtered bytes.
#[derive(Debug)]
pub struct FilterReader<R, F> {
    inner: R,
    filter: F,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: Read, F: ChunkFilter> FilterReader<R, F> {
    /// Wrap `inner`, reading [`DEFAULT_CHUNK_SIZE`] bytes at a time.
    pub fn new(inner: R, filter: F) -> Self {
        Self::with_chunk_size(inner, filter, DEFAULT_CHUNK_SIZE)
    }

    /// Wrap `inner`, reading `chunk_size` bytes at a time.
    pub fn with_chunk_size(inner: R, filter: F, chunk_size: usize) -> Self {
        Self {
            inner,
            filter,
            chunk: vec![0; chunk_size.max(1)],
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }

    /// The wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// The filter.
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Unwrap, discarding any filtered bytes not yet read.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> io::Result<()> {
        let n = self.inner.read(&mut self.chunk)?;
        let step = if n == 0 {
            self.done = true;
            self.filter.finish()?
        } else {
            self.filter.process(&self.chunk[..n], false)?
        };
        self.pending = step.into_bytes();
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read, F: ChunkFilter> Read for FilterReader<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.pending.len() {
            if self.done {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Filters everything written to it before passing it on to `W`.
///
/// Call [`FilterWriter::finish`] at the end; dropping the writer loses any
/// bytes the filter is still holding.
#[derive(Debug)]
pub struct FilterWriter<W: Write, F: ChunkFilter> {
    inner: Option<W>,
    filter: F,
}

impl<W: Write, F: ChunkFilter> FilterWriter<W, F> {
    /// Wrap `inner`.
    pub fn new(inner: W, filter: F) -> Self {
        Self {
            inner: Some(inner),
            filter,
        }
    }

    /// The wrapped writer.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    /// Flush the filter, then the writer, and return the writer.
    pub fn finish(mut self) -> io::Result<W> {
        let step = self.filter.finish()?;
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| io::Error::other("writer already finished"))?;
        if let Step::Emitted(bytes) = step {
            inner.write_all(&bytes)?;
        }
        inner.flush()?;
        Ok(inner)
    }

    fn inner_mut(&mut self) -> io::Result<&mut W> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("writer already finished"))
    }
}

impl<W: Write, F: ChunkFilter> Write for FilterWriter<W, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Step::Emitted(bytes) = self.filter.process(buf, false)? {
            self.inner_mut()?.write_all(&bytes)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner_mut()?.flush()
    }
}

impl<W: Write, F: ChunkFilter> Drop for FilterWriter<W, F> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(filter = ?self.filter, "filter writer dropped without finish");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::capability::EncodingRsCapability;
    use crate::convert_encoding::{EncodingFilter, SourceEncoding};
    use crate::settings::Settings;
    use crate::{Encoding, Locale};

    fn cp932_to_utf8() -> EncodingFilter {
        EncodingFilter::with_services(
            Encoding::Utf8,
            SourceEncoding::Named(Encoding::Cp932),
            Arc::new(EncodingRsCapability::new()),
            Arc::new(Settings::new(Locale::new("C").unwrap())),
        )
        .unwrap()
    }

    #[test]
    fn test_reader_with_tiny_chunks() {
        let input: &[u8] = b"\x83\x5C\x83\x5C\x82\xF1";
        let mut reader = FilterReader::with_chunk_size(input, cp932_to_utf8(), 1);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "ソソん");
    }

    #[test]
    fn test_reader_surfaces_filter_errors() {
        let input: &[u8] = b"\x83\x5C\x83";
        let mut reader = FilterReader::new(input, cp932_to_utf8());
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_writer_finish_flushes_filter() {
        let mut writer = FilterWriter::new(Vec::new(), cp932_to_utf8());
        writer.write_all(b"\x83").unwrap();
        writer.write_all(b"\x5C\x82").unwrap();
        writer.write_all(b"\xF1").unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(out, "ソん".as_bytes());
    }
}
