//! Synchronization store for the active word

use tokio::sync::watch;

use super::{WordInterval, WordTimeIndex};

/// Reading position within the current segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSession {
    /// Segment being read
    pub segment_id: Option<String>,
    /// Last matched word; kept through timing gaps
    pub active_word_index: Option<usize>,
}

/// What the page should highlight
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Highlight {
    /// Segment the highlight belongs to
    pub segment_id: Option<String>,
    /// Index into the segment's sorted word table
    pub index: Option<usize>,
    /// Highlighted word
    pub word: Option<String>,
}

/// Holds the active word table and the highlighted word
///
/// Plain data driven by [`update_time`](Self::update_time); the page observes
/// changes through [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct SyncStore {
    index: WordTimeIndex,
    session: PlaybackSession,
    tx: watch::Sender<Highlight>,
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStore {
    /// Empty store with no segment
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: WordTimeIndex::default(),
            session: PlaybackSession::default(),
            tx: watch::channel(Highlight::default()).0,
        }
    }

    /// Replace the word table of the current segment
    ///
    /// The highlight is cleared since indices into the old table are meaningless.
    pub fn set_words(&mut self, words: impl Into<Vec<WordInterval>>) {
        self.index = WordTimeIndex::new(words);
        self.session.active_word_index = None;
        tracing::debug!(
            segment = ?self.session.segment_id,
            words = self.index.len(),
            "word table updated"
        );
        self.publish();
    }

    /// Move to another segment, dropping the previous segment's timings
    ///
    /// Setting the segment already active is a no-op.
    pub fn set_segment_id(&mut self, segment_id: impl Into<String>) {
        let segment_id = segment_id.into();
        if self.session.segment_id.as_deref() == Some(segment_id.as_str()) {
            return;
        }
        self.switch_segment(segment_id, Vec::<WordInterval>::new());
    }

    /// Move to another segment and install its word table in one step
    pub fn switch_segment(&mut self, segment_id: impl Into<String>, words: impl Into<Vec<WordInterval>>) {
        let segment_id = segment_id.into();
        tracing::debug!(segment = %segment_id, "switching segment");
        self.index = WordTimeIndex::new(words);
        self.session = PlaybackSession {
            segment_id: Some(segment_id),
            active_word_index: None,
        };
        self.publish();
    }

    /// Feed the playback clock; returns the active word index
    ///
    /// A miss (gap between words, before the first or after the last word)
    /// keeps the previous highlight.
    pub fn update_time(&mut self, position_ms: u64) -> Option<usize> {
        if let Some(index) = self.index.lookup(position_ms) {
            if self.session.active_word_index != Some(index) {
                self.session.active_word_index = Some(index);
                self.publish();
            }
        }
        self.session.active_word_index
    }

    /// Active word index
    #[must_use]
    pub const fn active_index(&self) -> Option<usize> {
        self.session.active_word_index
    }

    /// Active word
    #[must_use]
    pub fn active_word(&self) -> Option<&WordInterval> {
        self.session
            .active_word_index
            .and_then(|i| self.index.get(i))
    }

    /// Current session
    #[must_use]
    pub const fn session(&self) -> &PlaybackSession {
        &self.session
    }

    /// Current word table
    #[must_use]
    pub const fn index(&self) -> &WordTimeIndex {
        &self.index
    }

    /// Observe highlight changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Highlight> {
        self.tx.subscribe()
    }

    fn publish(&self) {
        let next = Highlight {
            segment_id: self.session.segment_id.clone(),
            index: self.session.active_word_index,
            word: self.active_word().map(|w| w.word.clone()),
        };
        self.tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
