//! Story Narrator - Narrated playback engine for illustrated stories
//!
//! This library turns story text into synthesized narration and keeps the
//! spoken word highlighted:
//! - Audio file cache with deduplicated downloads and claim-based cleanup
//! - Narration queue: eager prefetch, strictly ordered playback, force stop
//! - Playback controller over a single native audio output
//! - Word time index and synchronization store for highlighting
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Caller                          │
//! │   enqueue  │  force_stop  │  switch_segment  │ ...   │
//! └───────┬─────────────────────────────┬───────────────┘
//!         │                             │
//! ┌───────▼──────────────┐     ┌────────▼───────────────┐
//! │   Narration Queue    │     │   Synchronization      │
//! │ prefetch → play 1×1  │────▶│   Store (ticker)       │
//! └───────┬──────────────┘     └────────────────────────┘
//!         │
//! ┌───────▼──────────────┐     ┌────────────────────────┐
//! │     Audio Cache      │     │  Playback Controller   │
//! │  (TTS downloads)     │     │  (speaker output)      │
//! └──────────────────────┘     └────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod highlight;
pub mod narration;
pub mod transcript;
pub mod voice;

pub use cache::{AudioCache, AudioFetcher, AudioSource, CacheClaim, CacheEntry, HttpFetcher};
pub use config::Config;
pub use error::{Error, Result};
pub use highlight::{Highlight, PositionSource, SyncStore, WordInterval, WordTimeIndex};
pub use narration::{JobStatus, Narration, NarrationEvent, NarrationJob, NarrationQueue};
pub use transcript::TranscriptClient;
pub use voice::{PlaybackController, TextToSpeech, VoiceSelection};
