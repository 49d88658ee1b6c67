//! Playback controller
//!
//! Sole owner of the native [`AudioOutput`]. Every `play()` that starts a clip
//! from the top opens a new run; a run ends exactly once, either by playing
//! out ([`PlaybackOutcome::Completed`]) or by being stopped or replaced
//! ([`PlaybackOutcome::Interrupted`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::AudioOutput;
use crate::Result;
use crate::cache::AudioSource;

/// Fired by an output when the loaded clip plays out
#[derive(Debug)]
pub struct EndSignal {
    fired: Arc<AtomicBool>,
    tx: oneshot::Sender<()>,
}

impl EndSignal {
    /// Create a signal and the receiver it completes
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                fired: Arc::new(AtomicBool::new(false)),
                tx,
            },
            rx,
        )
    }

    /// Signal natural completion; consumes the signal so it fires at most once
    pub fn fire(self) {
        self.fired.store(true, Ordering::Release);
        let _ = self.tx.send(());
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fired)
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing loaded
    Empty,
    /// Clip loaded, at the start
    Ready,
    /// Output running
    Playing,
    /// Output paused mid-clip
    Paused,
    /// Stopped and rewound
    Stopped,
    /// Clip played out
    Ended,
}

/// How a playback run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The clip played to the end
    Completed,
    /// Stopped, replaced, or torn down first
    Interrupted,
}

/// Resolves once when the run it was taken from ends
#[derive(Debug)]
pub struct Finished {
    end: oneshot::Receiver<()>,
    interrupt: CancellationToken,
}

impl Finished {
    /// Wait for the run to end
    pub async fn wait(self) -> PlaybackOutcome {
        tokio::select! {
            biased;
            () = self.interrupt.cancelled() => PlaybackOutcome::Interrupted,
            ended = self.end => match ended {
                Ok(()) => PlaybackOutcome::Completed,
                Err(_) => PlaybackOutcome::Interrupted,
            },
        }
    }
}

struct Run {
    end: Option<oneshot::Receiver<()>>,
    ended: Arc<AtomicBool>,
    interrupt: CancellationToken,
}

impl Run {
    fn interrupt(&self) {
        self.interrupt.cancel();
    }
}

/// Wraps exactly one audio output session
pub struct PlaybackController {
    output: Box<dyn AudioOutput>,
    loaded: bool,
    state: PlayerState,
    run: Option<Run>,
}

impl PlaybackController {
    /// Take ownership of an output session
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            loaded: false,
            state: PlayerState::Empty,
            run: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PlayerState {
        if self.state == PlayerState::Playing
            && self
                .run
                .as_ref()
                .is_some_and(|run| run.ended.load(Ordering::Acquire))
        {
            return PlayerState::Ended;
        }
        self.state
    }

    /// Load a new clip, ending the current run first
    ///
    /// # Errors
    ///
    /// Returns error if the output cannot load the clip; the controller is
    /// left empty.
    pub async fn replace(&mut self, source: &AudioSource) -> Result<()> {
        self.end_run();
        self.output.pause();
        self.loaded = false;
        self.state = PlayerState::Empty;

        self.output.load(source).await?;
        self.output.seek(Duration::ZERO);
        self.loaded = true;
        self.state = PlayerState::Ready;
        tracing::debug!(?source, "playback source replaced");
        Ok(())
    }

    /// Start, resume, or restart output
    ///
    /// A no-op when nothing is loaded or output is already running.
    ///
    /// # Errors
    ///
    /// Returns error if the output refuses to start
    pub fn play(&mut self) -> Result<()> {
        match self.state() {
            PlayerState::Empty => {
                tracing::debug!("play ignored: nothing loaded");
                Ok(())
            }
            PlayerState::Playing => Ok(()),
            PlayerState::Paused => {
                self.output.play()?;
                self.state = PlayerState::Playing;
                Ok(())
            }
            PlayerState::Ended => {
                self.output.seek(Duration::ZERO);
                self.start_run()
            }
            PlayerState::Ready | PlayerState::Stopped => self.start_run(),
        }
    }

    /// Pause output, keeping the position and the current run
    pub fn pause(&mut self) {
        if self.state() == PlayerState::Playing {
            self.output.pause();
            self.state = PlayerState::Paused;
        }
    }

    /// Pause and rewind, interrupting the current run
    pub fn stop(&mut self) {
        self.end_run();
        self.output.pause();
        if self.loaded {
            self.output.seek(Duration::ZERO);
            self.state = PlayerState::Stopped;
        }
    }

    /// Take the completion handle of the current run
    ///
    /// Returns `None` when no run is active or its handle was already taken.
    pub fn finished(&mut self) -> Option<Finished> {
        let run = self.run.as_mut()?;
        let end = run.end.take()?;
        Some(Finished {
            end,
            interrupt: run.interrupt.clone(),
        })
    }

    /// Play head of the loaded clip
    #[must_use]
    pub fn position(&self) -> Duration {
        if self.loaded {
            self.output.position()
        } else {
            Duration::ZERO
        }
    }

    fn start_run(&mut self) -> Result<()> {
        self.end_run();
        let (signal, end) = EndSignal::channel();
        let ended = signal.flag();
        self.output.listen(signal);

        if let Err(e) = self.output.play() {
            self.output.detach();
            return Err(e);
        }

        self.run = Some(Run {
            end: Some(end),
            ended,
            interrupt: CancellationToken::new(),
        });
        self.state = PlayerState::Playing;
        Ok(())
    }

    fn end_run(&mut self) {
        self.output.detach();
        if let Some(run) = self.run.take() {
            run.interrupt();
        }
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
