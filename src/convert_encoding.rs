//! Chunk-safe character encoding conversion.
//!
//! A multi-byte character split across two chunks would be mangled if each
//! chunk were converted on its own. Each filter keeps one [`Transcoder`]
//! for the life of the stream, so a character cut by a chunk boundary, or
//! ISO-2022-JP shift state, carries over to the next chunk.
//!
//! Shift_JIS and CP932 need more: their trail-byte range overlaps ASCII and
//! the lead-byte range, so the only reliable test for a split character is
//! to re-validate the chunk from its start, stripping trailing bytes until
//! the prefix is well formed. Stripped bytes wait in a bounded deferred
//! buffer. Detected sources are trimmed the same way so that detection
//! always sees whole characters.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::capability::{ConversionContext, EncodingCapability, EncodingRsCapability, Transcoder};
use crate::filter::{ChunkFilter, Step};
use crate::settings::Settings;
use crate::{Encoding, EncodingFamily, Error, Result};

/// Default bound on the deferred buffer: three nominal 8 KiB chunks.
pub const DEFAULT_DEFERRED_LIMIT: usize = 3 * 8192;

/// Where the source encoding of a stream comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEncoding {
    /// A fixed encoding.
    Named(Encoding),
    /// Detect each chunk over the shared detection order.
    Default,
    /// Detect each chunk over the capability's own order, using `fallback`
    /// when nothing matches.
    Auto {
        /// Encoding assumed when detection fails.
        fallback: Option<Encoding>,
    },
}

impl SourceEncoding {
    /// The fixed encoding, if any.
    pub fn named(&self) -> Option<Encoding> {
        match self {
            SourceEncoding::Named(encoding) => Some(*encoding),
            _ => None,
        }
    }
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEncoding::Named(encoding) => write!(f, "{encoding}"),
            SourceEncoding::Default => f.write_str("default"),
            SourceEncoding::Auto { fallback: None } => f.write_str("auto"),
            SourceEncoding::Auto {
                fallback: Some(encoding),
            } => write!(f, "auto:{encoding}"),
        }
    }
}

impl FromStr for SourceEncoding {
    type Err = Error;

    /// Accepts an encoding name, `default`, `auto` or `auto:FALLBACK`.
    fn from_str(s: &str) -> Result<Self> {
        let unknown =
            || Error::Configuration(format!("unknown source encoding: from_encoding={s}"));

        if s.eq_ignore_ascii_case("default") {
            return Ok(SourceEncoding::Default);
        }
        if s.eq_ignore_ascii_case("auto") {
            return Ok(SourceEncoding::Auto { fallback: None });
        }
        if let Some((head, fallback)) = s.split_once(':') {
            if head.eq_ignore_ascii_case("auto") {
                let fallback = Encoding::from_name(fallback).ok_or_else(unknown)?;
                return Ok(SourceEncoding::Auto {
                    fallback: Some(fallback),
                });
            }
        }
        Encoding::from_name(s)
            .map(SourceEncoding::Named)
            .ok_or_else(unknown)
    }
}

/// Source resolved at construction time.
#[derive(Debug, Clone)]
enum Source {
    Fixed {
        encoding: Encoding,
        trim: bool,
    },
    Detected {
        candidates: Vec<Encoding>,
        fallback: Option<Encoding>,
    },
}

/// Converts a byte stream from one encoding to another, one chunk at a time.
#[derive(Debug)]
pub struct EncodingFilter {
    to: Encoding,
    from: SourceEncoding,
    source: Source,
    deferred: Vec<u8>,
    deferred_limit: usize,
    transcoder: Option<Box<dyn Transcoder>>,
    capability: Arc<dyn EncodingCapability>,
    settings: Arc<Settings>,
}

impl EncodingFilter {
    /// Filter using the `encoding_rs` capability and the global settings.
    pub fn new(to: Encoding, from: SourceEncoding) -> Result<Self> {
        Self::with_services(
            to,
            from,
            Arc::new(EncodingRsCapability::new()),
            Settings::global(),
        )
    }

    /// Filter from `TO` and `FROM` names as they appear in filter specs.
    pub fn from_names(to: &str, from: &str) -> Result<Self> {
        let to = Encoding::from_name(to).ok_or_else(|| {
            Error::Configuration(format!("unknown target encoding: to_encoding={to}"))
        })?;
        Self::new(to, from.parse()?)
    }

    /// Filter with explicit capability and settings.
    ///
    /// A `Default` source takes a snapshot of the detection order now; later
    /// changes to the order do not affect this filter.
    pub fn with_services(
        to: Encoding,
        from: SourceEncoding,
        capability: Arc<dyn EncodingCapability>,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        if !capability.supports(to) {
            return Err(Error::Configuration(format!(
                "unknown target encoding: to_encoding={to}"
            )));
        }

        let source = match &from {
            SourceEncoding::Named(encoding) => {
                if *encoding == to {
                    return Err(Error::Configuration(format!(
                        "source and target encodings are the same: to_encoding={to}, from_encoding={encoding}"
                    )));
                }
                if !capability.supports(*encoding) {
                    return Err(Error::Configuration(format!(
                        "unknown source encoding: from_encoding={encoding}"
                    )));
                }
                Source::Fixed {
                    encoding: *encoding,
                    trim: needs_trimming(*encoding),
                }
            }
            SourceEncoding::Default => Source::Detected {
                candidates: settings.detection_order.get(),
                fallback: None,
            },
            SourceEncoding::Auto { fallback } => Source::Detected {
                candidates: capability.auto_detect_order().to_vec(),
                fallback: *fallback,
            },
        };

        if let Source::Detected { candidates, .. } = &source {
            if candidates.is_empty() {
                return Err(Error::Configuration(format!(
                    "no detection candidates for from_encoding={from}"
                )));
            }
            if let Some(unsupported) = candidates.iter().find(|e| !capability.supports(**e)) {
                return Err(Error::Configuration(format!(
                    "unknown source encoding: from_encoding={unsupported}"
                )));
            }
        }

        debug!(to = %to, from = %from, "encoding filter created");
        Ok(Self {
            to,
            from,
            source,
            deferred: Vec::new(),
            deferred_limit: DEFAULT_DEFERRED_LIMIT,
            transcoder: None,
            capability,
            settings,
        })
    }

    /// Set the deferred-buffer bound.
    pub fn with_deferred_limit(mut self, limit: usize) -> Self {
        self.deferred_limit = limit;
        self
    }

    /// Target encoding.
    pub fn to(&self) -> Encoding {
        self.to
    }

    /// Source as configured.
    pub fn from(&self) -> &SourceEncoding {
        &self.from
    }

    /// Bytes currently held back.
    pub fn deferred(&self) -> &[u8] {
        &self.deferred
    }

    /// Source encoding for `data`, and whether its tail must be trimmed to
    /// whole characters before conversion.
    fn resolve_source(&self, data: &[u8], is_final: bool) -> Result<(Encoding, bool)> {
        match &self.source {
            Source::Fixed { encoding, trim } => Ok((*encoding, *trim)),
            Source::Detected {
                candidates,
                fallback,
            } => match self.capability.detect(data, candidates, is_final) {
                Some(result) => {
                    trace!(encoding = %result.encoding, score = result.score(), "detected");
                    Ok((result.encoding, true))
                }
                None => match fallback {
                    Some(encoding) => {
                        trace!(encoding = %encoding, "detection failed, using fallback");
                        Ok((*encoding, needs_trimming(*encoding)))
                    }
                    None => Err(Error::DetectionFailure {
                        preview: preview(data),
                    }),
                },
            },
        }
    }

    /// Length of the longest prefix of `data` that is well formed on its own.
    fn complete_prefix_len(&self, data: &[u8], encoding: Encoding) -> Result<usize> {
        let mut end = data.len();
        while end > 0 && !self.capability.is_valid(&data[..end], encoding) {
            end -= 1;
            let stripped = data.len() - end;
            if stripped > self.deferred_limit {
                return Err(Error::BufferLimitExceeded {
                    size: stripped,
                    limit: self.deferred_limit,
                });
            }
        }
        Ok(end)
    }

    fn transcode(&mut self, chunk: &[u8], is_final: bool) -> Result<Step> {
        let mut data = std::mem::take(&mut self.deferred);
        data.extend_from_slice(chunk);
        let ctx = self.settings.conversion_context();
        let mut out = Vec::new();

        if !data.is_empty() {
            let (encoding, trim) = self.resolve_source(&data, is_final)?;
            let end = if trim {
                self.complete_prefix_len(&data, encoding)?
            } else {
                data.len()
            };
            let remainder = data.split_off(end);

            if is_final && !remainder.is_empty() {
                return Err(Error::IncompleteSequenceAtEof {
                    encoding: encoding.name(),
                    pending: remainder.len(),
                });
            }
            if remainder.len() > self.deferred_limit {
                return Err(Error::BufferLimitExceeded {
                    size: remainder.len(),
                    limit: self.deferred_limit,
                });
            }

            trace!(
                from = %encoding,
                to = %self.to,
                input = chunk.len(),
                converting = data.len(),
                deferred = remainder.len(),
                "encoding chunk"
            );
            self.deferred = remainder;

            if encoding == self.to {
                if !data.is_empty() {
                    self.retire_transcoder(&ctx, &mut out)?;
                    out.extend_from_slice(&data);
                }
            } else {
                let transcoder = self.transcoder_for(encoding, &ctx, &mut out)?;
                out.extend(transcoder.transcode(&data, false, &ctx)?);
            }
        }

        if is_final {
            self.retire_transcoder(&ctx, &mut out)?;
        }
        if out.is_empty() {
            Ok(Step::NeedMore)
        } else {
            Ok(Step::Emitted(out))
        }
    }

    /// The stream's transcoder for `encoding`, replacing one left by an
    /// earlier detection.
    fn transcoder_for(
        &mut self,
        encoding: Encoding,
        ctx: &ConversionContext,
        out: &mut Vec<u8>,
    ) -> Result<&mut Box<dyn Transcoder>> {
        if self
            .transcoder
            .as_ref()
            .is_some_and(|t| t.source_encoding() != encoding)
        {
            debug!(from = %encoding, to = %self.to, "source encoding changed");
            self.retire_transcoder(ctx, out)?;
        }
        let capability = &self.capability;
        let to = self.to;
        Ok(self
            .transcoder
            .get_or_insert_with(|| capability.transcoder(encoding, to)))
    }

    /// End the current transcoder's stream, appending whatever it still held.
    fn retire_transcoder(&mut self, ctx: &ConversionContext, out: &mut Vec<u8>) -> Result<()> {
        if let Some(mut transcoder) = self.transcoder.take() {
            out.extend(transcoder.transcode(&[], true, ctx)?);
        }
        Ok(())
    }
}

impl ChunkFilter for EncodingFilter {
    fn process(&mut self, chunk: &[u8], is_final: bool) -> Result<Step> {
        self.transcode(chunk, is_final).inspect_err(|err| {
            warn!(to = %self.to, from = %self.from, error = %err, "encoding filter failed");
        })
    }
}

/// Shift_JIS-family sources are split by re-validation; everything else
/// relies on the transcoder carrying partial characters.
fn needs_trimming(encoding: Encoding) -> bool {
    encoding.family() == EncodingFamily::LegacyJapaneseVariableWidth
}

fn preview(data: &[u8]) -> String {
    const PREVIEW_BYTES: usize = 32;
    let mut out: Vec<String> = data
        .iter()
        .take(PREVIEW_BYTES)
        .map(|b| format!("{b:02X}"))
        .collect();
    if data.len() > PREVIEW_BYTES {
        out.push("..".to_string());
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::run_chunked;
    use crate::{Locale, SubstituteCharacter};

    fn settings() -> Arc<Settings> {
        Arc::new(Settings::new(Locale::new("C").unwrap()))
    }

    fn filter(to: Encoding, from: SourceEncoding) -> EncodingFilter {
        EncodingFilter::with_services(to, from, Arc::new(EncodingRsCapability::new()), settings())
            .unwrap()
    }

    const SJIS_TEXT: &[u8] = b"\x83\x5C\x83\x5C\x83\x5C\x83\x5C\x82\xF1";

    #[test]
    fn test_cp932_source_split_in_three_byte_chunks() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932));
        let out = run_chunked(&mut f, SJIS_TEXT, 3).unwrap();
        assert_eq!(out, "ソソソソん".as_bytes());
    }

    #[test]
    fn test_utf8_source_split_in_three_byte_chunks() {
        let mut f = filter(Encoding::Cp932, SourceEncoding::Named(Encoding::Utf8));
        let out = run_chunked(&mut f, "ソソソソん".as_bytes(), 3).unwrap();
        assert_eq!(out, SJIS_TEXT);
        let mut f = filter(Encoding::Cp932, SourceEncoding::Named(Encoding::Utf8));
        let out = run_chunked(&mut f, "ソソソソん".as_bytes(), 2).unwrap();
        assert_eq!(out, SJIS_TEXT);
    }

    #[test]
    fn test_split_lead_byte_is_deferred() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Sjis));
        assert_eq!(
            f.process(b"a\x83", false).unwrap(),
            Step::Emitted(b"a".to_vec())
        );
        assert_eq!(f.deferred(), b"\x83");
        assert_eq!(
            f.process(b"\x5C", false).unwrap(),
            Step::Emitted("ソ".as_bytes().to_vec())
        );
        assert_eq!(f.finish().unwrap(), Step::NeedMore);
    }

    #[test]
    fn test_lone_lead_byte_is_need_more() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932));
        assert_eq!(f.process(b"\x83", false).unwrap(), Step::NeedMore);
    }

    #[test]
    fn test_incomplete_at_eof() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932));
        f.process(b"\x83\x5C\x83", false).unwrap();
        assert_eq!(
            f.finish().unwrap_err(),
            Error::IncompleteSequenceAtEof {
                encoding: "CP932",
                pending: 1
            }
        );
    }

    #[test]
    fn test_deferred_limit() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Cp932))
            .with_deferred_limit(4);
        // a malformed byte keeps everything after it from validating
        let err = f.process(b"ab\xFFcdefgh", false).unwrap_err();
        assert_eq!(err, Error::BufferLimitExceeded { size: 5, limit: 4 });
    }

    #[test]
    fn test_same_encoding_rejected() {
        let err = EncodingFilter::with_services(
            Encoding::Utf8,
            SourceEncoding::Named(Encoding::Utf8),
            Arc::new(EncodingRsCapability::new()),
            settings(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::Configuration(
                "source and target encodings are the same: to_encoding=UTF-8, from_encoding=UTF-8"
                    .into()
            )
        );
    }

    #[test]
    fn test_from_names_errors() {
        assert_eq!(
            EncodingFilter::from_names("aaa", "UTF-8").unwrap_err(),
            Error::Configuration("unknown target encoding: to_encoding=aaa".into())
        );
        assert_eq!(
            EncodingFilter::from_names("UTF-8", "aaa").unwrap_err(),
            Error::Configuration("unknown source encoding: from_encoding=aaa".into())
        );
        assert!(EncodingFilter::from_names("UTF-8", "SJIS-win").is_ok());
    }

    #[test]
    fn test_source_encoding_parse() {
        assert_eq!("default".parse::<SourceEncoding>().unwrap(), SourceEncoding::Default);
        assert_eq!(
            "auto".parse::<SourceEncoding>().unwrap(),
            SourceEncoding::Auto { fallback: None }
        );
        assert_eq!(
            "auto:CP932".parse::<SourceEncoding>().unwrap(),
            SourceEncoding::Auto {
                fallback: Some(Encoding::Cp932)
            }
        );
        assert_eq!(
            "JIS".parse::<SourceEncoding>().unwrap(),
            SourceEncoding::Named(Encoding::Iso2022Jp)
        );
        assert!("auto:aaa".parse::<SourceEncoding>().is_err());
    }

    #[test]
    fn test_default_source_detects_per_chunk() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Default);
        let out = run_chunked(&mut f, SJIS_TEXT, 4).unwrap();
        assert_eq!(out, "ソソソソん".as_bytes());
    }

    #[test]
    fn test_detected_target_encoding_passes_through() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Default);
        let out = run_chunked(&mut f, "ソソん".as_bytes(), 64).unwrap();
        assert_eq!(out, "ソソん".as_bytes());
    }

    #[test]
    fn test_default_order_is_snapshot() {
        let s = settings();
        let mut f = EncodingFilter::with_services(
            Encoding::Utf8,
            SourceEncoding::Default,
            Arc::new(EncodingRsCapability::new()),
            Arc::clone(&s),
        )
        .unwrap();
        s.detection_order.set(&[Encoding::Ascii]).unwrap();
        assert_eq!(run_chunked(&mut f, SJIS_TEXT, 64).unwrap(), "ソソソソん".as_bytes());
    }

    #[test]
    fn test_detection_failure() {
        let mut f = filter(Encoding::Cp932, SourceEncoding::Auto { fallback: None });
        let err = f.process(b"\xFFab", true).unwrap_err();
        assert_eq!(
            err,
            Error::DetectionFailure {
                preview: "FF 61 62".into()
            }
        );
    }

    #[test]
    fn test_auto_fallback() {
        let mut f = filter(
            Encoding::Utf8,
            SourceEncoding::Auto {
                fallback: Some(Encoding::Cp932),
            },
        );
        let out = run_chunked(&mut f, SJIS_TEXT, 64).unwrap();
        assert_eq!(out, "ソソソソん".as_bytes());
    }

    #[test]
    fn test_substitute_scope_applies() {
        let s = settings();
        let mut f = EncodingFilter::with_services(
            Encoding::Cp932,
            SourceEncoding::Named(Encoding::Utf8),
            Arc::new(EncodingRsCapability::new()),
            Arc::clone(&s),
        )
        .unwrap();
        let _guard = s.substitute.scope(Some(SubstituteCharacter::Long));
        let out = run_chunked(&mut f, "1艗1鎽1𩸽1".as_bytes(), 5).unwrap();
        assert_eq!(out, b"1U+82571U+93BD1U+29E3D1");
    }

    const EUC_TEXT: &[u8] = b"\xA4\xA2\xA4\xA4\xA4\xA6";
    const JIS_TEXT: &[u8] = b"\x1B$B\x24\x22\x24\x24\x1B(B";

    #[test]
    fn test_euc_jp_source_split_in_three_byte_chunks() {
        for from in [SourceEncoding::Named(Encoding::EucJp), SourceEncoding::Default] {
            let mut f = filter(Encoding::Utf8, from.clone());
            let out = run_chunked(&mut f, EUC_TEXT, 3).unwrap();
            assert_eq!(out, "あいう".as_bytes(), "from {from}");
        }
    }

    #[test]
    fn test_iso2022jp_source_split_anywhere() {
        for at in 0..=JIS_TEXT.len() {
            let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Iso2022Jp));
            let mut out = Vec::new();
            f.process(&JIS_TEXT[..at], false).unwrap().append_to(&mut out);
            f.process(&JIS_TEXT[at..], true).unwrap().append_to(&mut out);
            assert_eq!(out, "あい".as_bytes(), "split at {at}");
        }
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Iso2022Jp));
        assert_eq!(run_chunked(&mut f, JIS_TEXT, 5).unwrap(), "あい".as_bytes());
    }

    #[test]
    fn test_utf16_source_in_single_bytes() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Utf16Le));
        let out = run_chunked(&mut f, b"\x42\x30\x44\x30", 1).unwrap();
        assert_eq!(out, "あい".as_bytes());
    }

    #[test]
    fn test_utf16_odd_byte_at_eof() {
        let mut f = filter(Encoding::Utf8, SourceEncoding::Named(Encoding::Utf16Le));
        assert!(matches!(
            f.process(b"\x42", true),
            Err(Error::IncompleteSequenceAtEof {
                encoding: "UTF-16LE",
                ..
            })
        ));
    }

    #[test]
    fn test_utf8_split_at_eof() {
        let mut f = filter(Encoding::Cp932, SourceEncoding::Named(Encoding::Utf8));
        assert_eq!(f.process(b"a\xE3\x82", false).unwrap(), Step::Emitted(b"a".to_vec()));
        assert!(matches!(
            f.finish(),
            Err(Error::IncompleteSequenceAtEof { encoding: "UTF-8", .. })
        ));
    }

    #[test]
    fn test_iso2022jp_target_resets_only_at_end() {
        let mut f = filter(Encoding::Iso2022Jp, SourceEncoding::Named(Encoding::Utf8));
        assert_eq!(
            f.process("あ".as_bytes(), false).unwrap(),
            Step::Emitted(b"\x1B$B\x24\x22".to_vec())
        );
        assert_eq!(
            f.process("い".as_bytes(), false).unwrap(),
            Step::Emitted(b"\x24\x24".to_vec())
        );
        assert_eq!(f.finish().unwrap(), Step::Emitted(b"\x1B(B".to_vec()));
        assert_eq!(f.finish().unwrap(), Step::NeedMore);
    }
}
