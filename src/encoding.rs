//! Supported encodings, their canonical names and aliases.
//!
//! Names follow the spelling used by PHP's mbstring and iconv configuration
//! strings (`SJIS-win`, `eucJP-win`, `JIS`), because that is what filter
//! specifications coming from existing pipelines contain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Boundary behaviour class of an encoding.
///
/// Resolved once when a filter is built so the per-chunk path never repeats
/// name lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingFamily {
    /// UTF-8: self-synchronizing, split characters wait in the stream decoder.
    Utf8,
    /// Shift_JIS family: lead and trail byte ranges overlap, so a split
    /// character is only detectable by re-validating from the start.
    LegacyJapaneseVariableWidth,
    /// Everything else; split characters and shift state wait in the stream
    /// decoder.
    Other,
}

/// Supported character encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    // Unicode encodings
    /// UTF-8 Unicode encoding (variable length, 1-4 bytes)
    Utf8,
    /// UTF-16LE Unicode encoding (little endian)
    Utf16Le,
    /// UTF-16BE Unicode encoding (big endian)
    Utf16Be,
    /// ASCII (7-bit, 0-127)
    Ascii,

    // Japanese
    /// Shift_JIS (JIS X 0208 repertoire)
    Sjis,
    /// Microsoft code page 932, also spelled `SJIS-win` / `Windows-31J`
    Cp932,
    /// EUC-JP
    EucJp,
    /// EUC-JP compatible representation of Windows-31J
    EucJpWin,
    /// ISO-2022-JP, also spelled `JIS`
    Iso2022Jp,

    // Other CJK
    /// EUC-KR (Korean)
    EucKr,
    /// GBK (Simplified Chinese)
    Gbk,
    /// GB18030 (Simplified Chinese)
    Gb18030,
    /// Big5 (Traditional Chinese)
    Big5,

    // Single-byte
    /// Windows-1250 (Central/Eastern European)
    Windows1250,
    /// Windows-1251 (Cyrillic)
    Windows1251,
    /// Windows-1252 (Western European)
    Windows1252,
    /// ISO-8859-2 (Latin-2)
    Iso8859_2,
    /// ISO-8859-5 (Cyrillic)
    Iso8859_5,
    /// ISO-8859-15 (Latin-9)
    Iso8859_15,
    /// KOI8-R (Russian)
    Koi8R,
}

impl Encoding {
    /// Every supported encoding, in listing order.
    pub const ALL: [Encoding; 20] = [
        Encoding::Utf8,
        Encoding::Utf16Le,
        Encoding::Utf16Be,
        Encoding::Ascii,
        Encoding::Sjis,
        Encoding::Cp932,
        Encoding::EucJp,
        Encoding::EucJpWin,
        Encoding::Iso2022Jp,
        Encoding::EucKr,
        Encoding::Gbk,
        Encoding::Gb18030,
        Encoding::Big5,
        Encoding::Windows1250,
        Encoding::Windows1251,
        Encoding::Windows1252,
        Encoding::Iso8859_2,
        Encoding::Iso8859_5,
        Encoding::Iso8859_15,
        Encoding::Koi8R,
    ];

    /// Get the canonical name of this encoding
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Ascii => "ASCII",

            Encoding::Sjis => "SJIS",
            Encoding::Cp932 => "CP932",
            Encoding::EucJp => "EUC-JP",
            Encoding::EucJpWin => "eucJP-win",
            Encoding::Iso2022Jp => "ISO-2022-JP",

            Encoding::EucKr => "EUC-KR",
            Encoding::Gbk => "GBK",
            Encoding::Gb18030 => "GB18030",
            Encoding::Big5 => "BIG-5",

            Encoding::Windows1250 => "Windows-1250",
            Encoding::Windows1251 => "Windows-1251",
            Encoding::Windows1252 => "Windows-1252",
            Encoding::Iso8859_2 => "ISO-8859-2",
            Encoding::Iso8859_5 => "ISO-8859-5",
            Encoding::Iso8859_15 => "ISO-8859-15",
            Encoding::Koi8R => "KOI8-R",
        }
    }

    /// Alternative spellings accepted by [`Encoding::from_name`].
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Encoding::Utf8 => &["UTF8", "utf-8"],
            Encoding::Utf16Le => &["UTF16LE"],
            Encoding::Utf16Be => &["UTF16BE"],
            Encoding::Ascii => &["US-ASCII"],
            Encoding::Sjis => &["Shift_JIS", "SHIFT-JIS"],
            // `SJIS-win` was removed from mbstring in PHP 8.1; CP932 is the
            // same table.
            Encoding::Cp932 => &["SJIS-win", "Windows-31J", "MS_Kanji"],
            Encoding::EucJp => &["EUCJP", "EUC_JP"],
            Encoding::EucJpWin => &["CP51932"],
            Encoding::Iso2022Jp => &["JIS"],
            Encoding::EucKr => &["EUCKR", "UHC", "CP949"],
            Encoding::Gbk => &["CP936"],
            Encoding::Gb18030 => &[],
            Encoding::Big5 => &["Big5", "CP950"],
            Encoding::Windows1250 => &["CP1250"],
            Encoding::Windows1251 => &["CP1251"],
            Encoding::Windows1252 => &["CP1252"],
            Encoding::Iso8859_2 => &["LATIN2"],
            Encoding::Iso8859_5 => &[],
            Encoding::Iso8859_15 => &["LATIN9"],
            Encoding::Koi8R => &["KOI8R"],
        }
    }

    /// Resolve a canonical name or alias, case-insensitively.
    pub fn from_name(name: &str) -> Option<Encoding> {
        Encoding::ALL.into_iter().find(|encoding| {
            encoding.name().eq_ignore_ascii_case(name)
                || encoding
                    .aliases()
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(name))
        })
    }

    /// Boundary behaviour class used by the transcode filter.
    pub fn family(self) -> EncodingFamily {
        match self {
            Encoding::Utf8 => EncodingFamily::Utf8,
            Encoding::Sjis | Encoding::Cp932 => EncodingFamily::LegacyJapaneseVariableWidth,
            _ => EncodingFamily::Other,
        }
    }

    /// Check if this encoding uses variable-length character representation
    pub fn is_multibyte(self) -> bool {
        matches!(
            self,
            Encoding::Utf8
                | Encoding::Utf16Le
                | Encoding::Utf16Be
                | Encoding::Sjis
                | Encoding::Cp932
                | Encoding::EucJp
                | Encoding::EucJpWin
                | Encoding::Iso2022Jp
                | Encoding::EucKr
                | Encoding::Gbk
                | Encoding::Gb18030
                | Encoding::Big5
        )
    }

    /// Check if this encoding is ASCII-compatible (ASCII bytes 0-127 have same meaning)
    pub fn is_ascii_compatible(self) -> bool {
        !matches!(
            self,
            Encoding::Utf16Le | Encoding::Utf16Be | Encoding::Iso2022Jp
        )
    }

    /// Get the byte order mark (BOM) for this encoding if it has one
    pub fn bom(self) -> Option<&'static [u8]> {
        match self {
            Encoding::Utf8 => Some(&[0xEF, 0xBB, 0xBF]),
            Encoding::Utf16Le => Some(&[0xFF, 0xFE]),
            Encoding::Utf16Be => Some(&[0xFE, 0xFF]),
            _ => None,
        }
    }

    /// The `encoding_rs` codec backing this encoding.
    ///
    /// `Ascii` borrows windows-1252, which agrees with ASCII on 0x00-0x7F; the
    /// capability enforces the 7-bit range separately.
    pub(crate) fn codec(self) -> &'static encoding_rs::Encoding {
        match self {
            Encoding::Utf8 => encoding_rs::UTF_8,
            Encoding::Utf16Le => encoding_rs::UTF_16LE,
            Encoding::Utf16Be => encoding_rs::UTF_16BE,
            Encoding::Ascii => encoding_rs::WINDOWS_1252,
            Encoding::Sjis | Encoding::Cp932 => encoding_rs::SHIFT_JIS,
            Encoding::EucJp | Encoding::EucJpWin => encoding_rs::EUC_JP,
            Encoding::Iso2022Jp => encoding_rs::ISO_2022_JP,
            Encoding::EucKr => encoding_rs::EUC_KR,
            Encoding::Gbk => encoding_rs::GBK,
            Encoding::Gb18030 => encoding_rs::GB18030,
            Encoding::Big5 => encoding_rs::BIG5,
            Encoding::Windows1250 => encoding_rs::WINDOWS_1250,
            Encoding::Windows1251 => encoding_rs::WINDOWS_1251,
            Encoding::Windows1252 => encoding_rs::WINDOWS_1252,
            Encoding::Iso8859_2 => encoding_rs::ISO_8859_2,
            Encoding::Iso8859_5 => encoding_rs::ISO_8859_5,
            Encoding::Iso8859_15 => encoding_rs::ISO_8859_15,
            Encoding::Koi8R => encoding_rs::KOI8_R,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Encoding::from_name(s)
            .ok_or_else(|| Error::Configuration(format!("encoding not available: encoding={s}")))
    }
}

impl TryFrom<String> for Encoding {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Encoding> for String {
    fn from(value: Encoding) -> Self {
        value.name().to_string()
    }
}
