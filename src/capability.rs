//! The codec seam used by the transcode filter.
//!
//! Filters never touch codec tables directly. They ask an
//! [`EncodingCapability`] to validate and detect, and open a [`Transcoder`]
//! per stream to convert, passing the substitute policy and locale in a
//! [`ConversionContext`]. The shipped implementation,
//! [`EncodingRsCapability`], converts through a UTF-8 intermediate with
//! `encoding_rs`.

use std::fmt;

use encoding_rs::{DecoderResult, EncoderResult};
use tracing::trace;

use crate::detection::{DetectionResult, EncodingDetector};
use crate::{Encoding, Error, Locale, Result, SubstituteCharacter};

/// Settings in effect for a single conversion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionContext {
    /// How unconvertible characters are written.
    pub substitute: SubstituteCharacter,
    /// Locale the caller is operating under.
    pub locale: Locale,
}

impl ConversionContext {
    /// Context with an explicit substitute policy and the `C` locale.
    pub fn with_substitute(substitute: SubstituteCharacter) -> Self {
        Self {
            substitute,
            locale: Locale::c(),
        }
    }
}

/// Conversion state for one stream in one direction.
///
/// A character cut by the end of one piece, and any shift state such as
/// ISO-2022-JP's current character set, carries over to the next call.
pub trait Transcoder: Send + fmt::Debug {
    /// Encoding the transcoder decodes from.
    fn source_encoding(&self) -> Encoding;

    /// Convert the next piece of the stream.
    ///
    /// With `last` set the stream ends after `bytes`: a character still
    /// incomplete at that point is [`Error::IncompleteSequenceAtEof`] and
    /// stateful targets are returned to their initial state. The transcoder
    /// must not be used after a `last` call.
    fn transcode(&mut self, bytes: &[u8], last: bool, ctx: &ConversionContext) -> Result<Vec<u8>>;
}

/// Validation, detection and conversion over a fixed set of encodings.
pub trait EncodingCapability: Send + Sync + fmt::Debug {
    /// Whether `encoding` can be used as a source or target.
    fn supports(&self, encoding: Encoding) -> bool;

    /// Whether `bytes` is a complete, well-formed sequence in `encoding`.
    fn is_valid(&self, bytes: &[u8], encoding: Encoding) -> bool;

    /// Pick the best candidate for `bytes`.
    ///
    /// When `is_final` is false a truncated trailing character does not
    /// disqualify a candidate. Returns `None` when no candidate decodes.
    fn detect(
        &self,
        bytes: &[u8],
        candidates: &[Encoding],
        is_final: bool,
    ) -> Option<DetectionResult>;

    /// Open a stream converter from `from` to `to`.
    fn transcoder(&self, from: Encoding, to: Encoding) -> Box<dyn Transcoder>;

    /// Convert a complete buffer from `from` to `to`, substituting per `ctx`.
    fn convert(
        &self,
        bytes: &[u8],
        from: Encoding,
        to: Encoding,
        ctx: &ConversionContext,
    ) -> Result<Vec<u8>> {
        self.transcoder(from, to).transcode(bytes, true, ctx)
    }

    /// Candidates tried by `auto` sources.
    fn auto_detect_order(&self) -> &[Encoding] {
        &[Encoding::Ascii, Encoding::Utf8]
    }
}

/// [`EncodingCapability`] backed by `encoding_rs`.
///
/// `encoding_rs` implements the WHATWG tables, so `SJIS` and `CP932` share
/// the Windows-31J mapping and `eucJP-win` shares EUC-JP's.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodingRsCapability;

impl EncodingRsCapability {
    /// Create the capability.
    pub fn new() -> Self {
        Self
    }
}

impl EncodingCapability for EncodingRsCapability {
    fn supports(&self, _encoding: Encoding) -> bool {
        true
    }

    fn is_valid(&self, bytes: &[u8], encoding: Encoding) -> bool {
        decode_strict(bytes, encoding, true).is_some()
    }

    fn detect(
        &self,
        bytes: &[u8],
        candidates: &[Encoding],
        is_final: bool,
    ) -> Option<DetectionResult> {
        EncodingDetector::new().detect(bytes, candidates, is_final)
    }

    fn transcoder(&self, from: Encoding, to: Encoding) -> Box<dyn Transcoder> {
        Box::new(EncodingRsTranscoder::new(from, to))
    }
}

/// [`Transcoder`] holding one `encoding_rs` decoder and encoder for the life
/// of a stream.
///
/// `ASCII` sources are checked byte by byte; UTF-8, UTF-16 and `ASCII`
/// targets are written without an encoder.
pub struct EncodingRsTranscoder {
    from: Encoding,
    to: Encoding,
    decoder: Option<encoding_rs::Decoder>,
    encoder: Option<encoding_rs::Encoder>,
    /// Last bytes fed to the decoder, for rendering split malformed sequences.
    tail: Vec<u8>,
    finished: bool,
}

impl EncodingRsTranscoder {
    /// Fresh state for a stream from `from` to `to`.
    pub fn new(from: Encoding, to: Encoding) -> Self {
        let decoder = (from != Encoding::Ascii)
            .then(|| from.codec().new_decoder_without_bom_handling());
        let encoder = match to {
            // encoding_rs has no UTF-16 encoders
            Encoding::Utf8 | Encoding::Utf16Le | Encoding::Utf16Be | Encoding::Ascii => None,
            _ => Some(to.codec().new_encoder()),
        };
        Self {
            from,
            to,
            decoder,
            encoder,
            tail: Vec::with_capacity(TAIL_LEN),
            finished: false,
        }
    }

    fn decode(&mut self, bytes: &[u8], last: bool, ctx: &ConversionContext) -> Result<String> {
        let mut out = String::with_capacity(bytes.len());
        let Some(decoder) = self.decoder.as_mut() else {
            for &b in bytes {
                if b.is_ascii() {
                    out.push(char::from(b));
                } else {
                    out.push_str(&ctx.substitute.for_malformed(&[b]));
                }
            }
            return Ok(out);
        };

        let mut read_total = 0;
        loop {
            let remaining = bytes.len() - read_total;
            reserve_utf8(decoder, remaining, &mut out)?;
            let (result, read) =
                decoder.decode_to_string_without_replacement(&bytes[read_total..], &mut out, false);
            read_total += read;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(bad, consumed_after) => {
                    // the sequence may have started in an earlier piece
                    let end = read_total.saturating_sub(usize::from(consumed_after));
                    let mut seen = self.tail.clone();
                    seen.extend_from_slice(&bytes[..end]);
                    let start = seen.len().saturating_sub(usize::from(bad));
                    trace!(encoding = %self.from, offset = end, "malformed source sequence");
                    out.push_str(&ctx.substitute.for_malformed(&seen[start..]));
                }
            }
        }
        remember_tail(&mut self.tail, bytes);

        if last {
            let pending = pending_at_end(decoder, &mut out)?;
            if pending > 0 {
                return Err(Error::IncompleteSequenceAtEof {
                    encoding: self.from.name(),
                    pending,
                });
            }
        }
        Ok(out)
    }

    fn encode(&mut self, text: &str, last: bool, ctx: &ConversionContext) -> Result<Vec<u8>> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(match self.to {
                Encoding::Utf16Le => encode_utf16(text, u16::to_le_bytes),
                Encoding::Utf16Be => encode_utf16(text, u16::to_be_bytes),
                Encoding::Ascii => encode_ascii(text, ctx.substitute),
                _ => text.as_bytes().to_vec(),
            });
        };

        let mut out = Vec::with_capacity(text.len());
        let mut rest = text;
        while let Some((ch, tail)) = encode_until_unmappable(encoder, rest, &mut out)? {
            let replacement = ctx.substitute.for_unmappable(ch);
            if encode_until_unmappable(encoder, &replacement, &mut out)?.is_some() {
                encode_until_unmappable(encoder, "?", &mut out)?;
            }
            rest = tail;
        }
        if last {
            flush(encoder, &mut out)?;
        }
        Ok(out)
    }
}

impl Transcoder for EncodingRsTranscoder {
    fn source_encoding(&self) -> Encoding {
        self.from
    }

    fn transcode(&mut self, bytes: &[u8], last: bool, ctx: &ConversionContext) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Configuration(format!(
                "conversion already finished: from_encoding={}, to_encoding={}",
                self.from, self.to
            )));
        }
        self.finished = last;
        let text = self.decode(bytes, last, ctx)?;
        let out = self.encode(&text, last, ctx)?;
        trace!(
            from = %self.from,
            to = %self.to,
            locale = %ctx.locale,
            input = bytes.len(),
            output = out.len(),
            last,
            "converted"
        );
        Ok(out)
    }
}

impl fmt::Debug for EncodingRsTranscoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingRsTranscoder")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

const TAIL_LEN: usize = 4;

fn remember_tail(tail: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() >= TAIL_LEN {
        tail.clear();
        tail.extend_from_slice(&bytes[bytes.len() - TAIL_LEN..]);
    } else {
        tail.extend_from_slice(bytes);
        let excess = tail.len().saturating_sub(TAIL_LEN);
        tail.drain(..excess);
    }
}

fn reserve_utf8(decoder: &encoding_rs::Decoder, len: usize, out: &mut String) -> Result<()> {
    let needed = decoder
        .max_utf8_buffer_length_without_replacement(len)
        .ok_or(Error::BufferLimitExceeded {
            size: len,
            limit: isize::MAX as usize,
        })?;
    out.reserve(needed);
    Ok(())
}

/// End the decoder's input and report how many bytes it was still holding.
fn pending_at_end(decoder: &mut encoding_rs::Decoder, out: &mut String) -> Result<usize> {
    loop {
        reserve_utf8(decoder, 0, out)?;
        let (result, _) = decoder.decode_to_string_without_replacement(b"", out, true);
        match result {
            DecoderResult::InputEmpty => return Ok(0),
            DecoderResult::OutputFull => {}
            DecoderResult::Malformed(bad, _) => return Ok(usize::from(bad).max(1)),
        }
    }
}

/// Decode without substitution, or `None` on the first malformed sequence.
///
/// With `last == false` a truncated final character is accepted and left
/// out of the returned text.
pub(crate) fn decode_strict(bytes: &[u8], encoding: Encoding, last: bool) -> Option<String> {
    if encoding == Encoding::Ascii {
        return bytes
            .is_ascii()
            .then(|| bytes.iter().copied().map(char::from).collect());
    }

    let mut decoder = encoding.codec().new_decoder_without_bom_handling();
    let mut out = String::with_capacity(bytes.len());
    let mut read_total = 0;
    loop {
        let needed = decoder.max_utf8_buffer_length_without_replacement(bytes.len() - read_total)?;
        out.reserve(needed);
        let (result, read) =
            decoder.decode_to_string_without_replacement(&bytes[read_total..], &mut out, last);
        read_total += read;
        match result {
            DecoderResult::InputEmpty => return Some(out),
            DecoderResult::OutputFull => {}
            DecoderResult::Malformed(..) => return None,
        }
    }
}

/// Encode `text` until a character the target cannot represent, returning
/// it together with the text after it.
fn encode_until_unmappable<'a>(
    encoder: &mut encoding_rs::Encoder,
    text: &'a str,
    out: &mut Vec<u8>,
) -> Result<Option<(char, &'a str)>> {
    let mut read_total = 0;
    loop {
        reserve_for(encoder, text.len() - read_total, out)?;
        let (result, read) =
            encoder.encode_from_utf8_to_vec_without_replacement(&text[read_total..], out, false);
        read_total += read;
        match result {
            EncoderResult::InputEmpty => return Ok(None),
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(ch) => return Ok(Some((ch, &text[read_total..]))),
        }
    }
}

/// Return stateful encoders (ISO-2022-JP) to their initial state.
fn flush(encoder: &mut encoding_rs::Encoder, out: &mut Vec<u8>) -> Result<()> {
    loop {
        reserve_for(encoder, 0, out)?;
        let (result, _) = encoder.encode_from_utf8_to_vec_without_replacement("", out, true);
        if !matches!(result, EncoderResult::OutputFull) {
            return Ok(());
        }
    }
}

fn reserve_for(encoder: &encoding_rs::Encoder, len: usize, out: &mut Vec<u8>) -> Result<()> {
    let needed = encoder
        .max_buffer_length_from_utf8_without_replacement(len)
        .ok_or(Error::BufferLimitExceeded {
            size: len,
            limit: isize::MAX as usize,
        })?;
    out.reserve(needed);
    Ok(())
}

fn encode_utf16(text: &str, to_bytes: fn(u16) -> [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&to_bytes(unit));
    }
    out
}

fn encode_ascii(text: &str, substitute: SubstituteCharacter) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch as u8);
            continue;
        }
        let replacement = substitute.for_unmappable(ch);
        if replacement.is_ascii() {
            out.extend_from_slice(replacement.as_bytes());
        } else {
            out.push(b'?');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "1艗1鎽1𩸽1";

    fn convert(text: &str, to: Encoding, substitute: SubstituteCharacter) -> Vec<u8> {
        EncodingRsCapability::new()
            .convert(
                text.as_bytes(),
                Encoding::Utf8,
                to,
                &ConversionContext::with_substitute(substitute),
            )
            .unwrap()
    }

    #[test]
    fn test_round_trip_through_cp932() {
        let cap = EncodingRsCapability::new();
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::default());
        let sjis = cap
            .convert("ソソソソん".as_bytes(), Encoding::Utf8, Encoding::Cp932, &ctx)
            .unwrap();
        assert_eq!(sjis, b"\x83\x5C\x83\x5C\x83\x5C\x83\x5C\x82\xF1");
        let back = cap.convert(&sjis, Encoding::Cp932, Encoding::Utf8, &ctx).unwrap();
        assert_eq!(back, "ソソソソん".as_bytes());
    }

    #[test]
    fn test_substitute_long() {
        let out = convert(SOURCE, Encoding::Cp932, SubstituteCharacter::Long);
        assert_eq!(out, b"1U+82571U+93BD1U+29E3D1");
    }

    #[test]
    fn test_substitute_entity() {
        let out = convert(SOURCE, Encoding::Cp932, SubstituteCharacter::Entity);
        assert_eq!(out, b"1&#x8257;1&#x93BD;1&#x29E3D;1");
    }

    #[test]
    fn test_substitute_none() {
        let out = convert(SOURCE, Encoding::Cp932, SubstituteCharacter::None);
        assert_eq!(out, b"1111");
    }

    #[test]
    fn test_substitute_literal_falls_back_when_unmappable() {
        let out = convert("a\u{A9}", Encoding::Ascii, SubstituteCharacter::Char('a'));
        assert_eq!(out, b"aa");
        let out = convert("a\u{A9}", Encoding::Ascii, SubstituteCharacter::Char('\u{E9}'));
        assert_eq!(out, b"a?");
        let out = convert("x\u{1F600}", Encoding::Windows1252, SubstituteCharacter::Char('\u{3042}'));
        assert_eq!(out, b"x?");
    }

    #[test]
    fn test_malformed_source_bytes() {
        let cap = EncodingRsCapability::new();
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::Long);
        let out = cap
            .convert(b"a\xFFb", Encoding::Utf8, Encoding::Cp932, &ctx)
            .unwrap();
        assert_eq!(out, b"aBAD+FFb");
    }

    #[test]
    fn test_utf16_output() {
        let out = convert("aあ", Encoding::Utf16Le, SubstituteCharacter::default());
        assert_eq!(out, [0x61, 0x00, 0x42, 0x30]);
        let out = convert("aあ", Encoding::Utf16Be, SubstituteCharacter::default());
        assert_eq!(out, [0x00, 0x61, 0x30, 0x42]);
    }

    #[test]
    fn test_iso2022jp_returns_to_ascii() {
        let out = convert("あ", Encoding::Iso2022Jp, SubstituteCharacter::default());
        assert_eq!(out, b"\x1B$B\x24\x22\x1B(B");
    }

    fn transcode_in_pieces(bytes: &[u8], from: Encoding, to: Encoding, size: usize) -> Result<Vec<u8>> {
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::Long);
        let mut transcoder = EncodingRsCapability::new().transcoder(from, to);
        let mut out = Vec::new();
        for piece in bytes.chunks(size) {
            out.extend(transcoder.transcode(piece, false, &ctx)?);
        }
        out.extend(transcoder.transcode(&[], true, &ctx)?);
        Ok(out)
    }

    #[test]
    fn test_context_defaults_to_c_locale() {
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::None);
        assert_eq!(ctx.locale, Locale::c());
    }

    #[test]
    fn test_transcoder_carries_split_characters() {
        let euc = b"\xA4\xA2\xA4\xA4\xA4\xA6";
        let out = transcode_in_pieces(euc, Encoding::EucJp, Encoding::Utf8, 1).unwrap();
        assert_eq!(out, "あいう".as_bytes());

        let utf16 = b"\x42\x30\x44\x30";
        let out = transcode_in_pieces(utf16, Encoding::Utf16Le, Encoding::Utf8, 3).unwrap();
        assert_eq!(out, "あい".as_bytes());
    }

    #[test]
    fn test_transcoder_keeps_shift_state() {
        let jis = b"\x1B$B\x24\x22\x24\x24\x1B(B";
        for size in 1..jis.len() {
            let out = transcode_in_pieces(jis, Encoding::Iso2022Jp, Encoding::Utf8, size).unwrap();
            assert_eq!(out, "あい".as_bytes(), "piece size {size}");
        }
    }

    #[test]
    fn test_transcoder_flushes_shift_state_once() {
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::None);
        let mut transcoder = EncodingRsCapability::new().transcoder(Encoding::Utf8, Encoding::Iso2022Jp);
        assert_eq!(transcoder.transcode("あ".as_bytes(), false, &ctx).unwrap(), b"\x1B$B\x24\x22");
        assert_eq!(transcoder.transcode("い".as_bytes(), false, &ctx).unwrap(), b"\x24\x24");
        assert_eq!(transcoder.transcode(b"", true, &ctx).unwrap(), b"\x1B(B");
    }

    #[test]
    fn test_transcoder_reports_pending_bytes_at_end() {
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::Long);
        let mut transcoder = EncodingRsCapability::new().transcoder(Encoding::Utf16Le, Encoding::Utf8);
        assert_eq!(transcoder.transcode(b"\x42\x30\x44", false, &ctx).unwrap(), "あ".as_bytes());
        assert_eq!(
            transcoder.transcode(b"", true, &ctx),
            Err(Error::IncompleteSequenceAtEof {
                encoding: "UTF-16LE",
                pending: 1
            })
        );
        assert!(matches!(
            transcoder.transcode(b"", true, &ctx),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_malformed_sequence_split_across_pieces() {
        let ctx = ConversionContext::with_substitute(SubstituteCharacter::Long);
        let mut transcoder = EncodingRsCapability::new().transcoder(Encoding::Utf8, Encoding::Utf8);
        let mut out = transcoder.transcode(b"a\xE3", false, &ctx).unwrap();
        out.extend(transcoder.transcode(b"b", true, &ctx).unwrap());
        assert_eq!(out, b"aBAD+E3b");
    }

    #[test]
    fn test_validity() {
        let cap = EncodingRsCapability::new();
        assert!(cap.is_valid(b"\x83\x5C", Encoding::Cp932));
        assert!(!cap.is_valid(b"\x83", Encoding::Cp932));
        assert!(cap.is_valid(b"", Encoding::Cp932));
        assert!(!cap.is_valid(b"\x80", Encoding::Ascii));
        assert!(decode_strict(b"\xE3\x82", Encoding::Utf8, false).is_some());
        assert!(decode_strict(b"\xE3\x82", Encoding::Utf8, true).is_none());
    }
}
