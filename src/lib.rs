//! # chunk-transcode - Chunk-Safe Streaming Text Filters
//!
//! Character encoding and line-ending conversion for data that arrives in
//! arbitrary pieces, such as reads from a file or a socket.
//!
//! ## Features
//!
//! - **Split-character safety**: multi-byte characters cut by a chunk
//!   boundary are held back and completed by the next chunk
//! - **Legacy Japanese encodings**: Shift_JIS, CP932 (`SJIS-win`), EUC-JP,
//!   eucJP-win and ISO-2022-JP alongside UTF-8, UTF-16 and common code pages
//! - **Per-chunk detection** over a configurable candidate order
//! - **Substitution policies** for unmappable characters (`none`, `long`,
//!   `entity` or a literal character) with scoped, restorable settings
//! - **Line-ending normalization** between CR, LF and CRLF
//! - **`std::io` adapters** and filter chains built from
//!   `convert.encoding.TO:FROM|convert.linefeed.TO:FROM` strings
//!
//! ## Quick Start
//!
//! ```rust
//! use chunk_transcode::{ChunkFilter, Encoding, EncodingFilter, SourceEncoding, Step};
//!
//! let mut filter = EncodingFilter::new(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932))?;
//!
//! // "ソ" in CP932 is 0x83 0x5C; the lead byte arrives alone.
//! assert_eq!(filter.process(&[0x83], false)?, Step::NeedMore);
//! assert_eq!(filter.process(&[0x5C], false)?, Step::Emitted("ソ".as_bytes().to_vec()));
//! assert_eq!(filter.finish()?, Step::NeedMore);
//! # Ok::<(), chunk_transcode::Error>(())
//! ```

#![deny(missing_docs)]

pub mod capability;
pub mod config;
pub mod convert_encoding;
pub mod detection;
mod encoding;
pub mod filter;
pub mod io;
pub mod line_ending;
mod locale;
pub mod scoped;
pub mod settings;
mod substitute;

pub use capability::{
    ConversionContext, EncodingCapability, EncodingRsCapability, EncodingRsTranscoder, Transcoder,
};
pub use config::{FilterSpec, PipelineConfig};
pub use convert_encoding::{EncodingFilter, SourceEncoding};
pub use detection::{DetectionOrder, DetectionResult, EncodingDetector};
pub use encoding::{Encoding, EncodingFamily};
pub use filter::{ChunkFilter, FilterChain, Step};
pub use line_ending::{LineEnding, LineEndingFilter};
pub use locale::Locale;
pub use scoped::{ScopeGuard, ScopedSetting};
pub use settings::{Overrides, Settings};
pub use substitute::{MAX_SUBSTITUTE_CODE_POINT, SubstituteCharacter};

/// Result type for filter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by filters and settings. All of them are fatal to the
/// filter instance that produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Invalid or contradictory parameters, rejected before any data moves
    #[error("{0}")]
    Configuration(String),

    /// No candidate encoding could decode the data
    #[error("encoding detection failed: data={preview}")]
    DetectionFailure {
        /// Hex dump of the leading bytes
        preview: String,
    },

    /// The deferred buffer outgrew its bound
    #[error("deferred buffer size exceeded: {size} / {limit}")]
    BufferLimitExceeded {
        /// Bytes that would have been held back
        size: usize,
        /// Configured bound
        limit: usize,
    },

    /// The stream ended in the middle of a character
    #[error("stream ended inside a {encoding} character: {pending} byte(s) pending")]
    IncompleteSequenceAtEof {
        /// Source encoding name
        encoding: &'static str,
        /// Number of unconverted trailing bytes
        pending: usize,
    },

    /// `end` was called without a matching `start`
    #[error("{setting} stack is empty")]
    EmptyStack {
        /// Name of the scoped setting
        setting: &'static str,
    },
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// Convert a complete buffer in one call using the global settings.
///
/// `input` goes to an [`EncodingFilter`] as one chunk followed by
/// [`ChunkFilter::finish`], so a truncated trailing character is an error.
pub fn convert(input: &[u8], to: Encoding, from: SourceEncoding) -> Result<Vec<u8>> {
    let mut filter = EncodingFilter::new(to, from)?;
    let mut out = Vec::with_capacity(input.len());
    filter.process(input, false)?.append_to(&mut out);
    filter.finish()?.append_to(&mut out);
    Ok(out)
}
