//! The chunked transform contract shared by all filters.

use std::fmt;

use tracing::trace;

use crate::Result;

/// Outcome of feeding one chunk to a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Input was consumed (possibly held back); nothing to emit yet.
    NeedMore,
    /// Transformed output is available.
    Emitted(Vec<u8>),
}

impl Step {
    /// Emitted bytes, or an empty vector for [`Step::NeedMore`].
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Step::NeedMore => Vec::new(),
            Step::Emitted(bytes) => bytes,
        }
    }

    /// Append the emitted bytes, if any, to `out`.
    pub fn append_to(self, out: &mut Vec<u8>) {
        if let Step::Emitted(bytes) = self {
            out.extend_from_slice(&bytes);
        }
    }
}

/// A stateful per-stream byte transform.
///
/// Errors are fatal: once `process` fails the filter must not be fed again.
pub trait ChunkFilter: fmt::Debug {
    /// Transform one chunk. `is_final` marks the end of the stream.
    fn process(&mut self, chunk: &[u8], is_final: bool) -> Result<Step>;

    /// Signal end of stream and collect whatever is left.
    fn finish(&mut self) -> Result<Step> {
        self.process(&[], true)
    }
}

impl<F: ChunkFilter + ?Sized> ChunkFilter for Box<F> {
    fn process(&mut self, chunk: &[u8], is_final: bool) -> Result<Step> {
        (**self).process(chunk, is_final)
    }
}

/// Filters applied in order, each one's output feeding the next.
#[derive(Debug, Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn ChunkFilter + Send>>,
}

impl FilterChain {
    /// An empty chain; passes bytes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter.
    pub fn push(&mut self, filter: impl ChunkFilter + Send + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Builder form of [`FilterChain::push`].
    pub fn with(mut self, filter: impl ChunkFilter + Send + 'static) -> Self {
        self.push(filter);
        self
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ChunkFilter for FilterChain {
    fn process(&mut self, chunk: &[u8], is_final: bool) -> Result<Step> {
        if self.filters.is_empty() {
            return Ok(if chunk.is_empty() {
                Step::NeedMore
            } else {
                Step::Emitted(chunk.to_vec())
            });
        }

        let mut data = chunk.to_vec();
        let mut emitted = false;
        for (index, filter) in self.filters.iter_mut().enumerate() {
            match filter.process(&data, is_final)? {
                Step::Emitted(bytes) => {
                    data = bytes;
                    emitted = true;
                }
                Step::NeedMore if is_final => {
                    // downstream filters still have to flush
                    data.clear();
                    emitted = false;
                }
                Step::NeedMore => {
                    trace!(filter = index, "chain waiting for more input");
                    return Ok(Step::NeedMore);
                }
            }
        }

        Ok(if emitted {
            Step::Emitted(data)
        } else {
            Step::NeedMore
        })
    }
}

/// Run a whole buffer through `filter` in `chunk_size` pieces.
pub fn run_chunked<F: ChunkFilter + ?Sized>(
    filter: &mut F,
    input: &[u8],
    chunk_size: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    for chunk in input.chunks(chunk_size.max(1)) {
        filter.process(chunk, false)?.append_to(&mut out);
    }
    filter.finish()?.append_to(&mut out);
    Ok(out)
}
