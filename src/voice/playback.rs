//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use crate::cache::AudioSource;
use crate::voice::{ApiCredentials, EndSignal, Locator};
use crate::{Error, Result};

/// Preferred device sample rate (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Native audio output session
///
/// One implementation drives the speakers; tests substitute fakes. Only the
/// [`PlaybackController`](super::PlaybackController) calls into it.
#[async_trait]
pub trait AudioOutput: Send {
    /// Load a clip, replacing the current one and rewinding to the start
    ///
    /// Drops any installed end-of-clip listener unfired.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be read or decoded
    async fn load(&mut self, source: &AudioSource) -> Result<()>;

    /// Install the listener fired when output runs off the end of the clip
    fn listen(&mut self, on_end: EndSignal);

    /// Start or resume output
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    fn play(&mut self) -> Result<()>;

    /// Pause output, keeping the position
    fn pause(&mut self);

    /// Move the play head
    fn seek(&mut self, position: Duration);

    /// Current play head
    fn position(&self) -> Duration;

    /// Drop the end-of-clip listener without firing it
    fn detach(&mut self);
}

/// State shared with the device callback
struct DeckState {
    samples: Mutex<Arc<Vec<f32>>>,
    cursor: AtomicUsize,
    playing: AtomicBool,
    on_end: Mutex<Option<EndSignal>>,
}

impl DeckState {
    fn take_listener(&self) -> Option<EndSignal> {
        self.on_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Plays narration clips on the default output device
///
/// The `cpal` stream lives on a dedicated thread for the lifetime of this
/// value; playback state is exchanged through atomics.
pub struct SpeakerOutput {
    deck: Arc<DeckState>,
    sample_rate: u32,
    client: reqwest::Client,
    credentials: ApiCredentials,
    stream_timeout: Duration,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Open the default output device
    ///
    /// `credentials` are used when a clip has to be streamed from its locator;
    /// such a stream is abandoned after `stream_timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device is available
    pub fn new(credentials: ApiCredentials, stream_timeout: Duration) -> Result<Self> {
        let deck = Arc::new(DeckState {
            samples: Mutex::new(Arc::new(Vec::new())),
            cursor: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            on_end: Mutex::new(None),
        });

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let thread_deck = Arc::clone(&deck);

        let thread = std::thread::Builder::new()
            .name("narrator-audio".to_string())
            .spawn(move || match open_stream(thread_deck) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Blocks until the sender is dropped
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("audio thread exited during startup".to_string()))??;

        Ok(Self {
            deck,
            sample_rate,
            client: reqwest::Client::new(),
            credentials,
            stream_timeout,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Device sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn read_source(&self, source: &AudioSource) -> Result<Vec<u8>> {
        match source {
            AudioSource::Local(path) => Ok(tokio::fs::read(path).await?),
            AudioSource::Remote(locator) => {
                stream_clip(&self.client, &self.credentials, locator, self.stream_timeout).await
            }
        }
    }
}

/// Fetch a clip straight from its locator, giving up after `timeout`
async fn stream_clip(
    client: &reqwest::Client,
    credentials: &ApiCredentials,
    locator: &Locator,
    timeout: Duration,
) -> Result<Vec<u8>> {
    tracing::debug!(%locator, "streaming narration clip");
    let request = async {
        let response = credentials.apply(client.get(locator.as_str())).send().await?;
        if !response.status().is_success() {
            return Err(Error::Playback(format!(
                "streaming failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    };

    tokio::time::timeout(timeout, request).await.map_err(|_| {
        Error::Playback(format!("streaming timed out after {}ms", timeout.as_millis()))
    })?
}

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn load(&mut self, source: &AudioSource) -> Result<()> {
        self.pause();
        self.detach();

        let bytes = self.read_source(source).await?;
        let target_rate = self.sample_rate;
        let samples = tokio::task::spawn_blocking(move || {
            let (samples, rate) = decode_mp3(&bytes)?;
            if rate == target_rate || samples.is_empty() {
                Ok(samples)
            } else {
                resample_audio(&samples, rate, target_rate)
            }
        })
        .await
        .map_err(|e| Error::Audio(format!("decoder task failed: {e}")))??;

        tracing::debug!(samples = samples.len(), "narration clip loaded");

        *self
            .deck
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(samples);
        self.deck.cursor.store(0, Ordering::Release);
        Ok(())
    }

    fn listen(&mut self, on_end: EndSignal) {
        *self
            .deck
            .on_end
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(on_end);
    }

    fn play(&mut self) -> Result<()> {
        self.deck.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) {
        self.deck.playing.store(false, Ordering::Release);
    }

    fn seek(&mut self, position: Duration) {
        let len = self
            .deck
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let frames = position.as_millis() * u128::from(self.sample_rate) / 1000;
        let cursor = usize::try_from(frames).unwrap_or(usize::MAX).min(len);
        self.deck.cursor.store(cursor, Ordering::Release);
    }

    fn position(&self) -> Duration {
        let cursor = self.deck.cursor.load(Ordering::Acquire) as u64;
        Duration::from_millis(cursor * 1000 / u64::from(self.sample_rate.max(1)))
    }

    fn detach(&mut self) {
        drop(self.deck.take_listener());
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.deck.playing.store(false, Ordering::Release);
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for SpeakerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerOutput")
            .field("sample_rate", &self.sample_rate)
            .field("playing", &self.deck.playing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Build and start the output stream on the current thread
fn open_stream(deck: Arc<DeckState>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels = config.channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill_output(&deck, data, channels),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    Ok((stream, PLAYBACK_SAMPLE_RATE))
}

/// Device callback: copy mono samples into every channel of each frame
fn fill_output(deck: &DeckState, data: &mut [f32], channels: usize) {
    if !deck.playing.load(Ordering::Acquire) {
        data.fill(0.0);
        return;
    }

    // Never block the audio thread; a contended load outputs one silent buffer
    let Ok(samples) = deck.samples.try_lock().map(|s| Arc::clone(&s)) else {
        data.fill(0.0);
        return;
    };

    let mut pos = deck.cursor.load(Ordering::Acquire);
    let mut ended = false;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = if pos < samples.len() {
            pos += 1;
            samples[pos - 1]
        } else {
            ended = true;
            0.0
        };
        frame.fill(sample);
    }
    deck.cursor.store(pos, Ordering::Release);

    if ended {
        deck.playing.store(false, Ordering::Release);
        if let Some(on_end) = deck.take_listener() {
            on_end.fire();
        }
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(PLAYBACK_SAMPLE_RATE);
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Resample audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + 1);

    for chunk in samples.chunks(chunk_size) {
        // Pad the tail so the last words are not cut off
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}
