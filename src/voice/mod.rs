//! Voice output
//!
//! Builds synthesis locators and plays narration clips. The
//! [`PlaybackController`] is the only writer to the audio output.

mod controller;
mod playback;
mod tts;

pub use controller::{EndSignal, Finished, PlaybackController, PlaybackOutcome, PlayerState};
pub use playback::{AudioOutput, SpeakerOutput};
pub use tts::{ApiCredentials, Locator, TextToSpeech, VoiceSelection};
