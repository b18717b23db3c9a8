//! Filter specifications and pipeline configuration.
//!
//! Filters are named the way existing stream pipelines address them:
//!
//! ```text
//! convert.encoding.UTF-8:SJIS-win|convert.linefeed.LF:ALL
//! ```
//!
//! `convert.encoding.TO[:FROM]` defaults `FROM` to `default`;
//! `convert.linefeed.TO[:FROM]` defaults it to `ALL`. Chains are separated
//! by `|`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capability::EncodingCapability;
use crate::convert_encoding::{DEFAULT_DEFERRED_LIMIT, EncodingFilter, SourceEncoding};
use crate::filter::{ChunkFilter, FilterChain};
use crate::line_ending::{LineEnding, LineEndingFilter};
use crate::settings::{Overrides, Settings};
use crate::{Encoding, Error, Locale, Result, SubstituteCharacter};

/// Name prefix of encoding filters.
pub const ENCODING_FILTER_PREFIX: &str = "convert.encoding.";
/// Name prefix of line-ending filters.
pub const LINE_ENDING_FILTER_PREFIX: &str = "convert.linefeed.";
/// Separator between filters in a chain.
pub const CHAIN_SEPARATOR: char = '|';
/// Default read size for stream adapters.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Parse `8192`, `24K`, `1M`, `1G` (case-insensitive, powers of 1024).
/// `-1` means unlimited.
pub fn parse_byte_size(s: &str) -> Result<usize> {
    let invalid = || Error::Configuration(format!("invalid byte size: {s}"));
    let trimmed = s.trim();
    if trimmed == "-1" {
        return Ok(usize::MAX);
    }

    let (digits, unit) = match trimmed.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let value: usize = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(unit).ok_or_else(invalid)
}

/// A byte count that deserializes from either a number or a size string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ByteSizeRepr", into = "u64")]
pub struct ByteSize(pub usize);

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteSizeRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<ByteSizeRepr> for ByteSize {
    type Error = Error;

    fn try_from(value: ByteSizeRepr) -> Result<Self> {
        match value {
            ByteSizeRepr::Number(n) => usize::try_from(n)
                .map(ByteSize)
                .map_err(|_| Error::Configuration(format!("invalid byte size: {n}"))),
            ByteSizeRepr::Text(s) => parse_byte_size(&s).map(ByteSize),
        }
    }
}

impl From<ByteSize> for u64 {
    fn from(value: ByteSize) -> Self {
        value.0 as u64
    }
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_byte_size(s).map(ByteSize)
    }
}

/// One filter in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterSpec {
    /// `convert.encoding.TO[:FROM]`
    Encoding {
        /// Target encoding.
        to: Encoding,
        /// Source encoding.
        from: SourceEncoding,
    },
    /// `convert.linefeed.TO[:FROM]`
    LineEnding {
        /// Target terminator.
        to: LineEnding,
        /// Accepted source terminators.
        from: LineEnding,
    },
}

impl FilterSpec {
    /// Build the filter this spec names.
    pub fn build(
        &self,
        capability: Arc<dyn EncodingCapability>,
        settings: Arc<Settings>,
        deferred_limit: usize,
    ) -> Result<Box<dyn ChunkFilter + Send>> {
        let filter: Box<dyn ChunkFilter + Send> = match self {
            FilterSpec::Encoding { to, from } => Box::new(
                EncodingFilter::with_services(*to, from.clone(), capability, settings)?
                    .with_deferred_limit(deferred_limit),
            ),
            FilterSpec::LineEnding { to, from } => Box::new(LineEndingFilter::new(*to, *from)?),
        };
        Ok(filter)
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Encoding { to, from } => write!(f, "{ENCODING_FILTER_PREFIX}{to}:{from}"),
            FilterSpec::LineEnding { to, from } => {
                write!(f, "{LINE_ENDING_FILTER_PREFIX}{to}:{from}")
            }
        }
    }
}

impl FromStr for FilterSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(options) = strip_prefix_ignore_case(s, ENCODING_FILTER_PREFIX) {
            let (to, from) = match options.split_once(':') {
                Some((to, from)) => (to, from),
                None => (options, "default"),
            };
            let to = Encoding::from_name(to).ok_or_else(|| {
                Error::Configuration(format!("unknown target encoding: to_encoding={to}"))
            })?;
            return Ok(FilterSpec::Encoding {
                to,
                from: from.parse()?,
            });
        }
        if let Some(options) = strip_prefix_ignore_case(s, LINE_ENDING_FILTER_PREFIX) {
            let (to, from) = match options.split_once(':') {
                Some((to, from)) => (to, from),
                None => (options, "ALL"),
            };
            return Ok(FilterSpec::LineEnding {
                to: to.parse()?,
                from: from.parse()?,
            });
        }
        Err(Error::Configuration(format!("unknown filter: filtername={s}")))
    }
}

impl TryFrom<String> for FilterSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FilterSpec> for String {
    fn from(value: FilterSpec) -> Self {
        value.to_string()
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Parse a `|`-separated filter chain. Empty segments are ignored.
pub fn parse_filter_chain(s: &str) -> Result<Vec<FilterSpec>> {
    s.split(CHAIN_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// Render filters back into chain syntax.
pub fn format_filter_chain(filters: &[FilterSpec]) -> String {
    filters
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Everything needed to run a conversion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Filters, applied in order.
    pub filters: Vec<FilterSpec>,
    /// Candidates for `default` sources while the pipeline runs.
    pub detection_order: Option<Vec<Encoding>>,
    /// Substitute policy while the pipeline runs.
    pub substitute: Option<SubstituteCharacter>,
    /// Locale while the pipeline runs.
    pub locale: Option<Locale>,
    /// Read size for stream adapters.
    pub chunk_size: ByteSize,
    /// Bound on each encoding filter's deferred buffer.
    pub deferred_limit: ByteSize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            detection_order: None,
            substitute: None,
            locale: None,
            chunk_size: ByteSize(DEFAULT_CHUNK_SIZE),
            deferred_limit: ByteSize(DEFAULT_DEFERRED_LIMIT),
        }
    }
}

impl PipelineConfig {
    /// Configuration running the given chain string.
    pub fn from_chain(chain: &str) -> Result<Self> {
        Ok(Self {
            filters: parse_filter_chain(chain)?,
            ..Self::default()
        })
    }

    /// Reject settings that cannot work before any data is read.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size.0 == 0 {
            return Err(Error::Configuration("chunk size must be positive".into()));
        }
        if self.filters.is_empty() {
            return Err(Error::Configuration("no filters configured".into()));
        }
        if let Some(order) = &self.detection_order {
            if order.is_empty() {
                return Err(Error::Configuration(
                    "detection order must name at least one encoding".into(),
                ));
            }
        }
        Ok(())
    }

    /// Scoped settings this configuration installs.
    ///
    /// Unset values keep whatever is currently in effect rather than falling
    /// back to the safe defaults.
    pub fn overrides(&self, settings: &Settings) -> Overrides {
        Overrides {
            substitute: Some(self.substitute.unwrap_or_else(|| settings.substitute.current())),
            locale: Some(
                self.locale
                    .clone()
                    .unwrap_or_else(|| settings.locale.current()),
            ),
            detection_order: Some(
                self.detection_order
                    .clone()
                    .unwrap_or_else(|| settings.detection_order.get()),
            ),
        }
    }

    /// Build the filter chain. Call inside [`Settings::run_scoped`] so
    /// `default` sources see the configured detection order.
    pub fn build_chain(
        &self,
        capability: Arc<dyn EncodingCapability>,
        settings: Arc<Settings>,
    ) -> Result<FilterChain> {
        self.validate()?;
        let mut chain = FilterChain::new();
        for spec in &self.filters {
            chain.push(spec.build(
                Arc::clone(&capability),
                Arc::clone(&settings),
                self.deferred_limit.0,
            )?);
        }
        Ok(chain)
    }
}
