use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use story_narrator::config::{CacheConfig, file};
use story_narrator::highlight::{Highlight, spawn_ticker};
use story_narrator::transcript::load_transcript_file;
use story_narrator::voice::{ApiCredentials, SpeakerOutput};
use story_narrator::{
    AudioCache, Config, HttpFetcher, NarrationEvent, NarrationQueue, PlaybackController,
    SyncStore, TextToSpeech, TranscriptClient, VoiceSelection,
};

/// Narrator - Narrated playback for illustrated stories
#[derive(Parser)]
#[command(name = "narrator", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Narrate texts in order through the speaker
    Speak {
        /// Texts to narrate, one clip each
        #[arg(required = true)]
        texts: Vec<String>,
        /// Segment the texts belong to; enables transcript highlighting
        #[arg(short, long)]
        segment: Option<String>,
        /// Voice id overriding the configured voice
        #[arg(long, env = "NARRATOR_VOICE_ID")]
        voice: Option<String>,
    },
    /// Replay a transcript against a simulated clock
    Highlight {
        /// Transcript JSON file
        transcript: PathBuf,
        /// Stop the clock here (default: just past the last word)
        #[arg(long)]
        until_ms: Option<u64>,
        /// Clock step
        #[arg(long, default_value = "50")]
        step_ms: u64,
    },
    /// Print the narration cache directory
    CacheDir,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,story_narrator=info",
        1 => "info,story_narrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Speak {
            texts,
            segment,
            voice,
        } => speak(texts, segment, voice).await,
        Command::Highlight {
            transcript,
            until_ms,
            step_ms,
        } => highlight(&transcript, until_ms, step_ms).await,
        Command::CacheDir => {
            let dir = CacheConfig::resolve(file::load_config_file().cache).dir;
            println!("{}", dir.display());
            Ok(())
        }
    }
}

async fn speak(texts: Vec<String>, segment: Option<String>, voice: Option<String>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let credentials = ApiCredentials::from_config(&config.tts);

    let mut voice = voice.map_or_else(|| config.tts.voice.clone(), |voice_id| {
        VoiceSelection::Voice { voice_id }
    });
    if let Some(segment) = &segment {
        voice = voice.for_segment(segment);
    }

    let cache = AudioCache::new(
        &config.cache.dir,
        Arc::new(HttpFetcher::new(credentials.clone())),
        config.tts.download_timeout,
    );
    let output = SpeakerOutput::new(credentials.clone(), config.tts.download_timeout)?;
    let queue = NarrationQueue::new(
        TextToSpeech::new(&config.tts)?,
        cache,
        PlaybackController::new(Box::new(output)),
        voice.clone(),
    );

    let stop_ticker = CancellationToken::new();
    if let (Some(segment), Some(endpoint)) = (&segment, &config.transcript.endpoint) {
        let store = Arc::new(Mutex::new(SyncStore::new()));
        let (gender, lang) = match &voice {
            VoiceSelection::Profile { gender, lang, .. } => (gender.as_str(), lang.as_str()),
            VoiceSelection::Voice { .. } => ("", ""),
        };
        let words = TranscriptClient::new(endpoint.as_str(), credentials)
            .fetch(gender, lang, segment)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(segment = %segment, error = %e, "transcript unavailable");
                Vec::new()
            });

        let mut highlights = {
            let mut store = store.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            store.switch_segment(segment.as_str(), words);
            store.subscribe()
        };
        spawn_ticker(
            Arc::new(queue.clone()),
            store,
            config.playback.tick_interval,
            stop_ticker.clone(),
        );
        tokio::spawn(async move {
            while highlights.changed().await.is_ok() {
                print_highlight(&highlights.borrow_and_update());
            }
        });
    }

    let mut events = queue.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let NarrationEvent::Prefetched { job, local } = event {
                tracing::debug!(job = %job, local, "clip ready");
            }
        }
    });

    let narrations: Vec<_> = texts.iter().map(|text| queue.enqueue(text.as_str())).collect();

    let finished = async {
        let mut failures = 0usize;
        for (text, narration) in texts.iter().zip(narrations) {
            if let Err(e) = narration.await {
                tracing::warn!(text = %text, error = %e, "narration skipped");
                failures += 1;
            }
        }
        failures
    };

    let failures = tokio::select! {
        failures = finished => failures,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping narration");
            queue.force_stop().await;
            0
        }
    };

    stop_ticker.cancel();
    queue.cache().clear();

    if failures > 0 {
        anyhow::bail!("{failures} of {} narrations failed", texts.len());
    }
    Ok(())
}

async fn highlight(transcript: &Path, until_ms: Option<u64>, step_ms: u64) -> anyhow::Result<()> {
    let words = load_transcript_file(transcript).await?;
    let segment = transcript
        .file_stem()
        .map_or_else(|| "segment".to_string(), |s| s.to_string_lossy().into_owned());

    let mut store = SyncStore::new();
    let mut highlights = store.subscribe();
    store.switch_segment(segment, words);
    let _ = highlights.borrow_and_update();

    let until = until_ms.unwrap_or_else(|| {
        store
            .index()
            .words()
            .iter()
            .map(|w| w.end)
            .max()
            .unwrap_or(0)
            + step_ms
    });

    let mut time = 0;
    while time <= until {
        store.update_time(time);
        if highlights.has_changed().unwrap_or(false) {
            print!("{time:>7}ms ");
            print_highlight(&highlights.borrow_and_update());
        }
        time += step_ms.max(1);
    }
    Ok(())
}

fn print_highlight(highlight: &Highlight) {
    match (&highlight.index, &highlight.word) {
        (Some(index), Some(word)) => println!("[{index}] {word}"),
        _ => println!("-"),
    }
}
