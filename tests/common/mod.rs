//! Shared test utilities

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use story_narrator::cache::{AudioFetcher, AudioSource};
use story_narrator::voice::{ApiCredentials, AudioOutput, EndSignal, Locator};
use story_narrator::{
    AudioCache, Error, NarrationQueue, PlaybackController, Result, TextToSpeech, VoiceSelection,
};

/// Endpoint used by test locators
pub const TTS_ENDPOINT: &str = "https://tts.test/speak";

/// Text a test locator was built from
pub fn text_of(locator: &str) -> String {
    locator
        .split_once("text=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or_default())
        .map(|text| urlencoding::decode(text).expect("valid locator").into_owned())
        .unwrap_or_default()
}

/// Fetcher whose downloads can be held back or failed per text
#[derive(Default)]
pub struct ScriptedFetcher {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<HashSet<String>>,
    started: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold back downloads of `text` until the returned gate is notified
    pub fn gate(&self, text: &str) -> Arc<Notify> {
        Arc::clone(
            self.gates
                .lock()
                .unwrap()
                .entry(text.to_string())
                .or_insert_with(|| Arc::new(Notify::new())),
        )
    }

    /// Make downloads of `text` fail
    pub fn fail(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    /// Texts whose download was started, in order
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Texts whose download wrote a file, in order
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioFetcher for ScriptedFetcher {
    async fn fetch(&self, locator: &Locator, dest: &Path) -> Result<()> {
        let text = text_of(locator.as_str());
        self.started.lock().unwrap().push(text.clone());

        let gate = self.gates.lock().unwrap().get(&text).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().unwrap().contains(&text) {
            return Err(Error::Download("503 Service Unavailable".to_string()));
        }

        tokio::fs::write(dest, locator.as_str()).await?;
        self.completed.lock().unwrap().push(text);
        Ok(())
    }
}

#[derive(Default)]
struct OutputLog {
    loaded: Option<String>,
    listener: Option<EndSignal>,
    fresh: bool,
    calls: Vec<String>,
    position: Duration,
}

/// Output that records every call; clips end on `finish` or immediately
#[derive(Clone, Default)]
pub struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
    auto_finish: bool,
}

impl RecordingOutput {
    /// Clips play until [`finish`](Self::finish) is called
    pub fn manual() -> Self {
        Self::default()
    }

    /// Clips end as soon as they start
    pub fn auto() -> Self {
        Self {
            auto_finish: true,
            ..Self::default()
        }
    }

    /// End the playing clip; false if nothing is listening
    pub fn finish(&self) -> bool {
        let listener = self.log.lock().unwrap().listener.take();
        listener.map(EndSignal::fire).is_some()
    }

    /// Move the play head
    pub fn advance(&self, position: Duration) {
        self.log.lock().unwrap().position = position;
    }

    /// Every call as `"<op> <text>"`
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().calls.clone()
    }

    /// Texts whose clip started playing from the top, in order
    pub fn starts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("start "))
            .map(str::to_string)
            .collect()
    }

    /// Texts loaded, in order
    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("load "))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn load(&mut self, source: &AudioSource) -> Result<()> {
        let locator = match source {
            AudioSource::Local(path) => tokio::fs::read_to_string(path).await?,
            AudioSource::Remote(locator) => locator.as_str().to_string(),
        };
        let kind = if source.is_local() { "local" } else { "remote" };
        let text = text_of(&locator);

        let mut log = self.log.lock().unwrap();
        log.calls.push(format!("load {text}"));
        log.calls.push(format!("{kind} {text}"));
        log.loaded = Some(text);
        log.position = Duration::ZERO;
        Ok(())
    }

    fn listen(&mut self, on_end: EndSignal) {
        let mut log = self.log.lock().unwrap();
        log.listener = Some(on_end);
        log.fresh = true;
    }

    fn play(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        let text = log.loaded.clone().unwrap_or_default();
        let op = if std::mem::take(&mut log.fresh) { "start" } else { "resume" };
        log.calls.push(format!("{op} {text}"));

        if self.auto_finish {
            if let Some(listener) = log.listener.take() {
                listener.fire();
            }
        }
        Ok(())
    }

    fn pause(&mut self) {
        let mut log = self.log.lock().unwrap();
        let text = log.loaded.clone().unwrap_or_default();
        log.calls.push(format!("pause {text}"));
    }

    fn seek(&mut self, position: Duration) {
        self.log.lock().unwrap().position = position;
    }

    fn position(&self) -> Duration {
        self.log.lock().unwrap().position
    }

    fn detach(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.listener = None;
        log.fresh = false;
    }
}

/// Cache over scripted downloads, writing into `dir`
pub fn cache_in(dir: &Path, fetcher: Arc<ScriptedFetcher>) -> AudioCache {
    AudioCache::new(dir, fetcher, Duration::from_secs(5))
}

/// Narration queue over fake collaborators, caching into `dir`
pub fn narrator(dir: &Path, fetcher: Arc<ScriptedFetcher>, output: RecordingOutput) -> NarrationQueue {
    narrator_over(cache_in(dir, fetcher), output)
}

/// Narration queue downloading through `cache`
pub fn narrator_over(cache: AudioCache, output: RecordingOutput) -> NarrationQueue {
    let tts = TextToSpeech::with_endpoint(TTS_ENDPOINT, ApiCredentials::default())
        .expect("valid endpoint");
    NarrationQueue::new(
        tts,
        cache,
        PlaybackController::new(Box::new(output)),
        VoiceSelection::Voice {
            voice_id: "narrator".to_string(),
        },
    )
}

/// Files left in a cache directory
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
