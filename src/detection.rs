//! Encoding detection over an ordered candidate list
//!
//! Detection here answers a narrower question than general charset sniffing:
//! given the encodings a pipeline is prepared to accept, which one reads the
//! data most plausibly? Every candidate is decoded strictly; those that decode
//! are scored and the cheapest reading wins.

use parking_lot::RwLock;
use tracing::debug;

use crate::capability::decode_strict;
use crate::{Encoding, Error, Result};

/// Default candidate order used by `default` sources.
pub const DEFAULT_DETECTION_ORDER: [Encoding; 5] = [
    Encoding::EucJpWin,
    Encoding::Cp932,
    Encoding::Iso2022Jp,
    Encoding::Utf8,
    Encoding::Ascii,
];

/// Result of encoding detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    /// Winning encoding
    pub encoding: Encoding,
    /// Candidates that decoded cleanly with their scores, in candidate order.
    /// Lower is better.
    pub candidates: Vec<(Encoding, u64)>,
}

impl DetectionResult {
    /// Score of the winning encoding.
    pub fn score(&self) -> u64 {
        self.candidates
            .iter()
            .find(|(encoding, _)| *encoding == self.encoding)
            .map_or(0, |(_, score)| *score)
    }
}

/// Scores candidate readings of a byte sequence
#[derive(Debug, Clone)]
pub struct EncodingDetector {
    /// Maximum bytes to analyze for detection
    max_sample_size: usize,
}

impl Default for EncodingDetector {
    fn default() -> Self {
        Self {
            max_sample_size: usize::MAX,
        }
    }
}

impl EncodingDetector {
    /// Create a detector that looks at the whole input
    pub fn new() -> Self {
        Self::default()
    }

    /// Create detector with custom sample size
    ///
    /// A cut sample may end inside a character, so sampled detection always
    /// treats the input as non-final.
    pub fn with_sample_size(max_sample_size: usize) -> Self {
        Self { max_sample_size }
    }

    /// Pick the best of `candidates` for `data`, or `None` if none decodes.
    ///
    /// Ties go to the earliest candidate.
    pub fn detect(
        &self,
        data: &[u8],
        candidates: &[Encoding],
        is_final: bool,
    ) -> Option<DetectionResult> {
        let (sample, is_final) = if data.len() > self.max_sample_size {
            (&data[..self.max_sample_size], false)
        } else {
            (data, is_final)
        };

        let scored: Vec<(Encoding, u64)> = candidates
            .iter()
            .filter_map(|&encoding| {
                decode_strict(sample, encoding, is_final).map(|text| (encoding, score_text(&text)))
            })
            .collect();

        // min_by_key keeps the first of equal minima
        let (encoding, _) = scored.iter().copied().min_by_key(|(_, score)| *score)?;
        Some(DetectionResult {
            encoding,
            candidates: scored,
        })
    }
}

/// Cost of a decoded reading: one per character plus penalties for code
/// points that rarely appear in real text.
fn score_text(text: &str) -> u64 {
    text.chars().map(char_cost).sum()
}

fn char_cost(ch: char) -> u64 {
    match ch {
        '\t' | '\r' | '\n' => 1,
        // half-width katakana
        '\u{FF61}'..='\u{FF9F}' => 4,
        // private use area
        '\u{E000}'..='\u{F8FF}' => 16,
        c if c.is_control() => 16,
        _ => 1,
    }
}

/// Process-wide candidate list for `default` sources.
///
/// Always non-empty and free of duplicates.
#[derive(Debug)]
pub struct DetectionOrder {
    order: RwLock<Vec<Encoding>>,
}

impl Default for DetectionOrder {
    fn default() -> Self {
        Self {
            order: RwLock::new(DEFAULT_DETECTION_ORDER.to_vec()),
        }
    }
}

impl DetectionOrder {
    /// Registry holding [`DEFAULT_DETECTION_ORDER`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current order.
    pub fn get(&self) -> Vec<Encoding> {
        self.order.read().clone()
    }

    /// Replace the order, dropping later duplicates. Returns the old order.
    pub fn set(&self, encodings: &[Encoding]) -> Result<Vec<Encoding>> {
        let mut deduped: Vec<Encoding> = Vec::with_capacity(encodings.len());
        for &encoding in encodings {
            if !deduped.contains(&encoding) {
                deduped.push(encoding);
            }
        }
        if deduped.is_empty() {
            return Err(Error::Configuration(
                "detection order must name at least one encoding".into(),
            ));
        }

        debug!(order = ?deduped, "detection order set");
        Ok(std::mem::replace(&mut *self.order.write(), deduped))
    }

    /// Like [`DetectionOrder::set`], resolving names first.
    pub fn set_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Encoding>> {
        let encodings = names
            .iter()
            .map(|name| name.as_ref().parse::<Encoding>())
            .collect::<Result<Vec<_>>>()?;
        self.set(&encodings)
    }

    /// Restore [`DEFAULT_DETECTION_ORDER`]. Returns the old order.
    pub fn reset(&self) -> Vec<Encoding> {
        debug!("detection order reset");
        std::mem::replace(&mut *self.order.write(), DEFAULT_DETECTION_ORDER.to_vec())
    }
}
