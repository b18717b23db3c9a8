//! Line terminator normalization.
//!
//! Only the run of terminators at the end of each chunk is rewritten, which
//! matches line-at-a-time producers where every chunk is one line. A CR at
//! the end of one chunk and an LF at the start of the next are treated as two
//! separate terminators.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::filter::{ChunkFilter, Step};
use crate::{Error, Result};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// A line terminator form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineEnding {
    /// `\r`
    Cr,
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
    /// Any of the three; only valid as a source.
    All,
}

impl LineEnding {
    /// Bytes written for this terminator, or `None` for [`LineEnding::All`].
    pub fn as_bytes(self) -> Option<&'static [u8]> {
        match self {
            LineEnding::Cr => Some(b"\r"),
            LineEnding::Lf => Some(b"\n"),
            LineEnding::CrLf => Some(b"\r\n"),
            LineEnding::All => None,
        }
    }

    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            LineEnding::Cr => "CR",
            LineEnding::Lf => "LF",
            LineEnding::CrLf => "CRLF",
            LineEnding::All => "ALL",
        }
    }

    /// Length in bytes of the terminator ending at `data[..end]`, if `self`
    /// accepts one there.
    fn match_before(self, data: &[u8], end: usize) -> Option<usize> {
        let last = *data.get(end.checked_sub(1)?)?;
        let crlf = end >= 2 && data[end - 2] == CR && last == LF;
        match self {
            LineEnding::CrLf => crlf.then_some(2),
            LineEnding::Cr => (last == CR).then_some(1),
            LineEnding::Lf => (last == LF && !crlf).then_some(1),
            LineEnding::All if crlf => Some(2),
            LineEnding::All => (last == CR || last == LF).then_some(1),
        }
    }
}

impl fmt::Display for LineEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LineEnding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CR" => Ok(LineEnding::Cr),
            "LF" => Ok(LineEnding::Lf),
            "CRLF" => Ok(LineEnding::CrLf),
            "ALL" => Ok(LineEnding::All),
            _ => Err(Error::Configuration(format!(
                "unknown line ending: line_ending={s}"
            ))),
        }
    }
}

/// Rewrites trailing line terminators from one form to another.
#[derive(Debug, Clone)]
pub struct LineEndingFilter {
    to: LineEnding,
    from: LineEnding,
    replacement: &'static [u8],
}

impl LineEndingFilter {
    /// Create a filter converting `from` terminators to `to`.
    pub fn new(to: LineEnding, from: LineEnding) -> Result<Self> {
        let Some(replacement) = to.as_bytes() else {
            return Err(Error::Configuration(format!(
                "invalid target line ending: to_line_ending={to}"
            )));
        };
        if to == from {
            return Err(Error::Configuration(format!(
                "source and target line endings are the same: to_line_ending={to}, from_line_ending={from}"
            )));
        }
        debug!(to = %to, from = %from, "line ending filter created");
        Ok(Self {
            to,
            from,
            replacement,
        })
    }

    /// Filter from names as they appear in filter specs; `from` defaults to
    /// `ALL`.
    pub fn from_names(to: &str, from: Option<&str>) -> Result<Self> {
        let from = from.map_or(Ok(LineEnding::All), str::parse)?;
        Self::new(to.parse()?, from)
    }

    /// Target terminator.
    pub fn to(&self) -> LineEnding {
        self.to
    }

    /// Accepted source terminators.
    pub fn from(&self) -> LineEnding {
        self.from
    }

    /// Rewrite the trailing terminator run of `chunk`.
    pub fn normalize(&self, chunk: &[u8]) -> Vec<u8> {
        let mut matched_count = 0;
        let mut end = chunk.len();
        while let Some(len) = self.from.match_before(chunk, end) {
            matched_count += 1;
            end -= len;
        }

        let mut out = Vec::with_capacity(end + matched_count * self.replacement.len());
        out.extend_from_slice(&chunk[..end]);
        for _ in 0..matched_count {
            out.extend_from_slice(self.replacement);
        }
        trace!(
            matched_count,
            matched_bytes = chunk.len() - end,
            "line endings rewritten"
        );
        out
    }
}

impl ChunkFilter for LineEndingFilter {
    fn process(&mut self, chunk: &[u8], _is_final: bool) -> Result<Step> {
        if chunk.is_empty() {
            return Ok(Step::NeedMore);
        }
        Ok(Step::Emitted(self.normalize(chunk)))
    }
}
