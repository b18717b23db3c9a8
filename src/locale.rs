//! Locale names carried through conversion calls.
//!
//! Only the name is validated and recorded; nothing here calls `setlocale`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A validated locale name such as `ja_JP.UTF-8`, `C` or `Japanese_Japan.932`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Validate and wrap a locale name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if is_posix_locale(&name) || is_windows_locale(&name) {
            Ok(Locale(name))
        } else {
            Err(Error::Configuration(format!(
                "locale not available on this system: locale={name}"
            )))
        }
    }

    /// The `C` locale.
    pub fn c() -> Self {
        Locale("C".to_string())
    }

    /// The locale name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Working locale installed by a bare `start()`.
    ///
    /// Windows uses `C` because the Japanese code-page locale breaks CSV
    /// field splitting in downstream readers.
    pub fn safe_default() -> Self {
        let name = if cfg!(target_os = "macos") {
            "ja_JP.UTF-8"
        } else if cfg!(windows) {
            "C"
        } else {
            "ja_JP.utf8"
        };
        Locale(name.to_string())
    }

    /// Locale of the running process, from `LC_ALL`, `LC_CTYPE` or `LANG`.
    pub fn from_environment() -> Self {
        ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .and_then(|value| Locale::new(value).ok())
            .unwrap_or_else(|| Locale("C".to_string()))
    }
}

/// `C`, `POSIX`, `C.UTF-8` or `ll[_CC][.codeset][@modifier]`.
fn is_posix_locale(name: &str) -> bool {
    let (rest, modifier) = match name.split_once('@') {
        Some((rest, modifier)) => (rest, Some(modifier)),
        None => (name, None),
    };
    if let Some(modifier) = modifier {
        if modifier.is_empty() || !modifier.chars().all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }
    }

    let (head, codeset) = match rest.split_once('.') {
        Some((head, codeset)) => (head, Some(codeset)),
        None => (rest, None),
    };
    if let Some(codeset) = codeset {
        if codeset.is_empty()
            || !codeset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return false;
        }
    }

    if head == "C" || head == "POSIX" {
        return modifier.is_none();
    }

    let (language, territory) = match head.split_once('_') {
        Some((language, territory)) => (language, Some(territory)),
        None => (head, None),
    };
    let language_ok =
        (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_lowercase());
    let territory_ok = territory
        .is_none_or(|t| t.len() == 2 && t.chars().all(|c| c.is_ascii_uppercase()));
    language_ok && territory_ok
}

/// `Language_Country[.codepage]`, e.g. `Japanese_Japan.932`.
fn is_windows_locale(name: &str) -> bool {
    let (head, codepage) = match name.split_once('.') {
        Some((head, codepage)) => (head, Some(codepage)),
        None => (name, None),
    };
    if codepage.is_some_and(|cp| cp.is_empty() || !cp.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    let Some((language, country)) = head.split_once('_') else {
        return false;
    };
    let capitalized = |word: &str| {
        let mut chars = word.chars();
        chars.next().is_some_and(|c| c.is_ascii_uppercase())
            && word.len() > 2
            && chars.all(|c| c.is_ascii_alphabetic())
    };
    capitalized(language) && capitalized(country)
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Locale::new(s)
    }
}

impl TryFrom<String> for Locale {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Locale::new(value)
    }
}

impl From<Locale> for String {
    fn from(value: Locale) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_locales() {
        for name in [
            "C",
            "POSIX",
            "C.UTF-8",
            "ja_JP.utf8",
            "ja_JP.UTF-8",
            "ja_JP.eucJP",
            "ja_JP.SJIS",
            "en_US",
            "de_DE@euro",
            "Japanese_Japan.932",
            "Japanese_Japan.20932",
        ] {
            assert!(Locale::new(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_rejects_garbage() {
        let err = Locale::new("asdfqwer").unwrap_err();
        assert_eq!(
            err,
            Error::Configuration("locale not available on this system: locale=asdfqwer".into())
        );
        for name in ["", "ja_jp", "ja_JP.", "JA_JP", "Japanese_Japan.abc", "C@x"] {
            assert!(Locale::new(name).is_err(), "{name} should be rejected");
        }
    }

    #[test]
    fn test_c_locale_matches_validated_name() {
        assert_eq!(Locale::c(), Locale::new("C").unwrap());
        assert_eq!(Locale::c().as_str(), "C");
    }

    #[test]
    fn test_safe_default_is_valid() {
        let safe = Locale::safe_default();
        assert_eq!(Locale::new(safe.as_str()).unwrap(), safe);
    }
}
