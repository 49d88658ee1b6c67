//! Word highlighting
//!
//! Maps the advancing playback clock to the word currently being spoken.

mod store;
mod ticker;

pub use store::{Highlight, PlaybackSession, SyncStore};
pub use ticker::{PositionSource, spawn_ticker};

use serde::{Deserialize, Deserializer, Serialize};

/// One word of a segment and the time it is spoken, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordInterval {
    /// The word as written on the page
    pub word: String,
    /// Start of the word
    #[serde(deserialize_with = "millis")]
    pub start: u64,
    /// End of the word (inclusive)
    #[serde(deserialize_with = "millis")]
    pub end: u64,
    /// Whether the timing came from forced alignment rather than estimation
    #[serde(default = "aligned_default")]
    pub aligned: bool,
}

impl WordInterval {
    /// Aligned interval
    #[must_use]
    pub fn new(word: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
            aligned: true,
        }
    }

    /// Whether `time` falls within the interval
    #[must_use]
    pub const fn contains(&self, time: u64) -> bool {
        self.start <= time && time <= self.end
    }
}

const fn aligned_default() -> bool {
    true
}

/// Accept integer or fractional millisecond values
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid millisecond value {value}"
        )));
    }
    Ok(value.round() as u64)
}

/// Word table of one segment, sorted by start time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordTimeIndex {
    words: Vec<WordInterval>,
    /// `spans[k][i]` is the latest end among `words[i..i + 2^k]`
    spans: Vec<Vec<u64>>,
}

impl WordTimeIndex {
    /// Build an index; input order does not matter
    #[must_use]
    pub fn new(words: impl Into<Vec<WordInterval>>) -> Self {
        let mut words = words.into();
        words.sort_by_key(|w| w.start);

        let mut spans: Vec<Vec<u64>> = vec![words.iter().map(|w| w.end).collect()];
        let mut width = 1;
        while width * 2 <= words.len() {
            let narrower = &spans[spans.len() - 1];
            let wider = (0..=words.len() - width * 2)
                .map(|i| narrower[i].max(narrower[i + width]))
                .collect();
            spans.push(wider);
            width *= 2;
        }

        Self { words, spans }
    }

    /// Index of the word spoken at `time`, or `None` in a gap or out of range
    ///
    /// Binary search on start time, then a logarithmic step back over words
    /// that ended before `time`. When intervals overlap (unaligned timings),
    /// the latest-starting interval covering `time` wins.
    #[must_use]
    pub fn lookup(&self, time: u64) -> Option<usize> {
        let mut end = self.words.partition_point(|w| w.start <= time);
        for (level, span) in self.spans.iter().enumerate().rev() {
            let width = 1 << level;
            if end >= width && span[end - width] < time {
                end -= width;
            }
        }
        end.checked_sub(1)
    }

    /// Sorted words
    #[must_use]
    pub fn words(&self) -> &[WordInterval] {
        &self.words
    }

    /// Word at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&WordInterval> {
        self.words.get(index)
    }

    /// Number of words
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
