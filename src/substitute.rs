//! Replacement policy for characters that are invalid in the source or
//! unrepresentable in the target encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Highest code point accepted for [`SubstituteCharacter::Char`].
pub const MAX_SUBSTITUTE_CODE_POINT: u32 = 0xFFFE;

/// What to write in place of a character that cannot be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubstituteCharacter {
    /// Drop the character.
    None,
    /// `U+XXXX`
    Long,
    /// `&#xXXXX;`
    Entity,
    /// A literal replacement character.
    Char(char),
}

impl SubstituteCharacter {
    /// Value installed by a bare `start()`.
    pub const SAFE_DEFAULT: SubstituteCharacter = SubstituteCharacter::Entity;

    /// Value in effect before anything was pushed, mirroring mbstring's `?`.
    pub const INITIAL: SubstituteCharacter = SubstituteCharacter::Char('?');

    /// Build a literal substitute from a code point in `1..=0xFFFE`.
    pub fn from_code_point(code_point: u32) -> Result<Self> {
        if !(1..=MAX_SUBSTITUTE_CODE_POINT).contains(&code_point) {
            return Err(Error::Configuration(format!(
                "invalid substitute character: U+{code_point:04X}"
            )));
        }
        char::from_u32(code_point)
            .map(SubstituteCharacter::Char)
            .ok_or_else(|| {
                Error::Configuration(format!("invalid substitute character: U+{code_point:04X}"))
            })
    }

    /// Replacement text for a character the target encoding cannot represent.
    pub fn for_unmappable(self, ch: char) -> String {
        match self {
            SubstituteCharacter::None => String::new(),
            SubstituteCharacter::Long => format!("U+{:04X}", ch as u32),
            SubstituteCharacter::Entity => format!("&#x{:X};", ch as u32),
            SubstituteCharacter::Char(c) => c.to_string(),
        }
    }

    /// Replacement text for a malformed source byte sequence.
    ///
    /// There is no code point to name, so `Long` spells out the bytes and
    /// `Entity` degrades to `?`.
    pub fn for_malformed(self, bytes: &[u8]) -> String {
        match self {
            SubstituteCharacter::None => String::new(),
            SubstituteCharacter::Long => bytes.iter().map(|b| format!("BAD+{b:02X}")).collect(),
            SubstituteCharacter::Entity => "?".to_string(),
            SubstituteCharacter::Char(c) => c.to_string(),
        }
    }
}

impl Default for SubstituteCharacter {
    fn default() -> Self {
        SubstituteCharacter::INITIAL
    }
}

impl fmt::Display for SubstituteCharacter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstituteCharacter::None => f.write_str("none"),
            SubstituteCharacter::Long => f.write_str("long"),
            SubstituteCharacter::Entity => f.write_str("entity"),
            SubstituteCharacter::Char(c) => write!(f, "U+{:04X}", *c as u32),
        }
    }
}

impl FromStr for SubstituteCharacter {
    type Err = Error;

    /// Accepts `none`, `long`, `entity`, `U+XXXX`, `0xXXXX` or a decimal code
    /// point.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "none" => return Ok(SubstituteCharacter::None),
            "long" => return Ok(SubstituteCharacter::Long),
            "entity" => return Ok(SubstituteCharacter::Entity),
            _ => {}
        }

        let code_point = if let Some(hex) = trimmed
            .strip_prefix("U+")
            .or_else(|| trimmed.strip_prefix("u+"))
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            u32::from_str_radix(hex, 16).ok()
        } else {
            trimmed.parse::<u32>().ok()
        };

        match code_point {
            Some(code_point) => SubstituteCharacter::from_code_point(code_point),
            None => Err(Error::Configuration(format!(
                "invalid substitute character setting: {s}"
            ))),
        }
    }
}

impl TryFrom<String> for SubstituteCharacter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SubstituteCharacter> for String {
    fn from(value: SubstituteCharacter) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmappable_forms() {
        let fish = '\u{29E3D}';
        assert_eq!(SubstituteCharacter::None.for_unmappable(fish), "");
        assert_eq!(SubstituteCharacter::Long.for_unmappable(fish), "U+29E3D");
        assert_eq!(SubstituteCharacter::Long.for_unmappable('\u{8257}'), "U+8257");
        assert_eq!(SubstituteCharacter::Long.for_unmappable('\u{A9}'), "U+00A9");
        assert_eq!(SubstituteCharacter::Entity.for_unmappable(fish), "&#x29E3D;");
        assert_eq!(SubstituteCharacter::Char('a').for_unmappable(fish), "a");
    }

    #[test]
    fn test_malformed_forms() {
        assert_eq!(SubstituteCharacter::Long.for_malformed(&[0x83, 0xFF]), "BAD+83BAD+FF");
        assert_eq!(SubstituteCharacter::Entity.for_malformed(&[0x83]), "?");
        assert_eq!(SubstituteCharacter::None.for_malformed(&[0x83]), "");
    }

    #[test]
    fn test_parse_named_and_code_points() {
        assert_eq!("none".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::None);
        assert_eq!("LONG".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::Long);
        assert_eq!("U+0061".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::Char('a'));
        assert_eq!("0x61".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::Char('a'));
        assert_eq!("97".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::Char('a'));
        assert_eq!("1".parse::<SubstituteCharacter>().unwrap(), SubstituteCharacter::Char('\u{1}'));
    }

    #[test]
    fn test_rejects_out_of_range_and_unknown() {
        assert_eq!(
            SubstituteCharacter::from_code_point(MAX_SUBSTITUTE_CODE_POINT + 1).unwrap_err(),
            Error::Configuration("invalid substitute character: U+FFFF".into())
        );
        assert!(SubstituteCharacter::from_code_point(0).is_err());
        // surrogates are not characters
        assert!(SubstituteCharacter::from_code_point(0xD800).is_err());
        assert_eq!(
            "asdf".parse::<SubstituteCharacter>().unwrap_err(),
            Error::Configuration("invalid substitute character setting: asdf".into())
        );
    }

    #[test]
    fn test_serde_uses_string_form() {
        let json = serde_json::to_string(&SubstituteCharacter::Char('a')).unwrap();
        assert_eq!(json, "\"U+0061\"");
        let back: SubstituteCharacter = serde_json::from_str("\"entity\"").unwrap();
        assert_eq!(back, SubstituteCharacter::Entity);
    }
}
