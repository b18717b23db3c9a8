//! Shared conversion settings.

use std::sync::{Arc, LazyLock};

use tracing::debug;

use crate::capability::ConversionContext;
use crate::detection::{DEFAULT_DETECTION_ORDER, DetectionOrder};
use crate::scoped::ScopedSetting;
use crate::{Encoding, Error, Locale, SubstituteCharacter};

static GLOBAL: LazyLock<Arc<Settings>> = LazyLock::new(|| Arc::new(Settings::from_environment()));

/// Substitute policy, locale and detection order consulted by filters.
///
/// Filters hold an `Arc<Settings>` and read it on every chunk, so a scope
/// opened around a stream affects that stream. Tests build private
/// instances with [`Settings::new`]; everything else shares [`Settings::global`].
#[derive(Debug)]
pub struct Settings {
    /// Replacement policy for unconvertible characters.
    pub substitute: ScopedSetting<SubstituteCharacter>,
    /// Locale passed to the codec layer.
    pub locale: ScopedSetting<Locale>,
    /// Candidates for `default` sources.
    pub detection_order: DetectionOrder,
}

impl Settings {
    /// Settings starting from `?` substitution and the given locale.
    pub fn new(locale: Locale) -> Self {
        Self {
            substitute: ScopedSetting::new(
                "substitute_character",
                SubstituteCharacter::INITIAL,
                SubstituteCharacter::SAFE_DEFAULT,
            ),
            locale: ScopedSetting::new("locale", locale, Locale::safe_default()),
            detection_order: DetectionOrder::new(),
        }
    }

    /// Settings starting from the process locale.
    pub fn from_environment() -> Self {
        Self::new(Locale::from_environment())
    }

    /// The process-wide instance.
    pub fn global() -> Arc<Settings> {
        Arc::clone(&GLOBAL)
    }

    /// Snapshot of the values a conversion call needs.
    pub fn conversion_context(&self) -> ConversionContext {
        ConversionContext {
            substitute: self.substitute.current(),
            locale: self.locale.current(),
        }
    }
}

/// Values installed for the duration of [`Settings::run_scoped`].
///
/// `None` fields fall back to the safe defaults: `entity` substitution, the
/// platform Japanese locale and [`DEFAULT_DETECTION_ORDER`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Substitute policy.
    pub substitute: Option<SubstituteCharacter>,
    /// Locale.
    pub locale: Option<Locale>,
    /// Detection order for `default` sources.
    pub detection_order: Option<Vec<Encoding>>,
}

impl Settings {
    /// Run `f` with `overrides` installed, restoring every setting afterwards
    /// whether `f` succeeds, fails or panics.
    pub fn run_scoped<R, E>(
        &self,
        overrides: Overrides,
        f: impl FnOnce() -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E>
    where
        E: From<Error>,
    {
        let order = match overrides.detection_order {
            Some(order) if !order.is_empty() => order,
            _ => DEFAULT_DETECTION_ORDER.to_vec(),
        };

        let _locale = self.locale.scope(overrides.locale);
        let _substitute = self.substitute.scope(overrides.substitute);
        let _order = OrderGuard {
            order: &self.detection_order,
            previous: self.detection_order.set(&order)?,
        };
        f()
    }
}

struct OrderGuard<'a> {
    order: &'a DetectionOrder,
    previous: Vec<Encoding>,
}

impl Drop for OrderGuard<'_> {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        if self.order.set(&previous).is_err() {
            debug!("detection order was empty, resetting");
            self.order.reset();
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_environment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    fn settings() -> Settings {
        Settings::new(Locale::new("C").unwrap())
    }

    #[test]
    fn test_locale_stack_round_trip() {
        let s = settings();
        let x = Locale::new("ja_JP.UTF-8").unwrap();
        let y = Locale::new("en_US.UTF-8").unwrap();
        s.locale.start(Some(x.clone()));
        s.locale.start(Some(y));
        assert_eq!(s.locale.end(false).unwrap(), x);
        assert_eq!(s.locale.end(false).unwrap(), Locale::new("C").unwrap());
        assert_eq!(
            s.locale.end(false).unwrap_err(),
            Error::EmptyStack { setting: "locale" }
        );
    }

    #[test]
    fn test_substitute_defaults() {
        let s = settings();
        assert_eq!(s.substitute.current(), SubstituteCharacter::Char('?'));
        s.substitute.start(None);
        assert_eq!(s.substitute.current(), SubstituteCharacter::Entity);
        assert_eq!(s.conversion_context().substitute, SubstituteCharacter::Entity);
        s.substitute.end(true).unwrap();
        assert_eq!(s.substitute.current(), SubstituteCharacter::Char('?'));
    }

    #[test]
    fn test_run_scoped_restores_everything() {
        let s = settings();
        let overrides = Overrides {
            substitute: Some(SubstituteCharacter::Long),
            locale: None,
            detection_order: Some(vec![Encoding::Utf8]),
        };
        let seen = s
            .run_scoped(overrides.clone(), || -> Result<_> {
                Ok((
                    s.substitute.current(),
                    s.locale.current(),
                    s.detection_order.get(),
                ))
            })
            .unwrap();
        assert_eq!(
            seen,
            (SubstituteCharacter::Long, Locale::safe_default(), vec![Encoding::Utf8])
        );
        assert_eq!(s.substitute.current(), SubstituteCharacter::Char('?'));
        assert_eq!(s.locale.current(), Locale::new("C").unwrap());
        assert_eq!(s.detection_order.get(), DEFAULT_DETECTION_ORDER.to_vec());

        let err = s
            .run_scoped(overrides, || -> Result<()> {
                Err(Error::Configuration("boom".into()))
            })
            .unwrap_err();
        assert_eq!(err, Error::Configuration("boom".into()));
        assert_eq!(s.substitute.depth(), 0);
        assert_eq!(s.locale.depth(), 0);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&Settings::global(), &Settings::global()));
    }
}
