//! Narration queue
//!
//! Texts are turned into synthesis locators and prefetched the moment they
//! are enqueued, but played strictly one at a time in submission order. A
//! job's clip starts only after the previous job's run has ended.
//!
//! [`NarrationQueue::force_stop`] drops everything: queued jobs resolve with
//! [`Error::Cancelled`], the current clip is stopped, and every cache claim the
//! queue holds is released. Entries other holders of a shared cache claimed
//! are left alone.

mod job;

pub use job::{JobStatus, Narration, NarrationEvent, NarrationJob};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::cache::{AudioCache, Prefetch};
use crate::highlight::PositionSource;
use crate::voice::{PlaybackController, PlaybackOutcome, PlayerState, TextToSpeech, VoiceSelection};
use crate::{Error, Result};

/// Capacity of the event channel; slow subscribers lag rather than block
const EVENT_CAPACITY: usize = 64;

struct QueuedJob {
    job: NarrationJob,
    prefetch: Prefetch,
    /// Force-stop generation the job was enqueued in
    epoch: CancellationToken,
    /// Cancelled by `stop_current` or, through `epoch`, by `force_stop`
    cancel: CancellationToken,
    done: oneshot::Sender<Result<()>>,
}

struct CurrentJob {
    job: NarrationJob,
    epoch: CancellationToken,
    cancel: CancellationToken,
}

struct Inner {
    tts: TextToSpeech,
    cache: AudioCache,
    player: tokio::sync::Mutex<PlaybackController>,
    voice: Mutex<VoiceSelection>,
    epoch: Mutex<CancellationToken>,
    pending: Mutex<VecDeque<QueuedJob>>,
    current: Mutex<Option<CurrentJob>>,
    last: Mutex<Option<NarrationJob>>,
    wake: Notify,
    events: broadcast::Sender<NarrationEvent>,
    shutdown: CancellationToken,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Strictly ordered narration with eager prefetch
///
/// Cheap to clone; all clones drive the same queue. The worker stops and
/// remaining jobs are cancelled when the last clone is dropped.
#[derive(Clone)]
pub struct NarrationQueue {
    inner: Arc<Inner>,
    _worker: Arc<DropGuard>,
}

impl NarrationQueue {
    /// Create a queue and start its playback worker
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        tts: TextToSpeech,
        cache: AudioCache,
        player: PlaybackController,
        voice: VoiceSelection,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            tts,
            cache,
            player: tokio::sync::Mutex::new(player),
            voice: Mutex::new(voice),
            epoch: Mutex::new(shutdown.child_token()),
            pending: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            last: Mutex::new(None),
            wake: Notify::new(),
            events: broadcast::channel(EVENT_CAPACITY).0,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run(Arc::clone(&inner)));

        Self {
            inner,
            _worker: Arc::new(shutdown.drop_guard()),
        }
    }

    /// Narrate `text` in the default voice
    pub fn enqueue(&self, text: impl Into<String>) -> Narration {
        let voice = locked(&self.inner.voice).clone();
        self.enqueue_with(text, &voice)
    }

    /// Narrate `text` in `voice`
    ///
    /// The clip starts downloading immediately, regardless of queue position.
    pub fn enqueue_with(&self, text: impl Into<String>, voice: &VoiceSelection) -> Narration {
        let text = text.into();
        let (done, rx) = oneshot::channel();

        if text.trim().is_empty() {
            let id = Uuid::new_v4();
            let _ = done.send(Err(Error::Tts("nothing to narrate".to_string())));
            return Narration::new(id, rx);
        }

        let locator = self.inner.tts.locator(&text_of(&text), voice);
        let job = NarrationJob::new(text, locator);
        let id = job.id;

        // Holding the generation lock keeps a concurrent force_stop from
        // sweeping between the prefetch and the push
        let generation = locked(&self.inner.epoch);
        let epoch = CancellationToken::clone(&generation);
        let prefetch = self.inner.cache.prefetch(&job.locator);
        let cancel = epoch.child_token();
        spawn_prefetch_notice(&self.inner.events, id, &prefetch, &cancel);

        tracing::info!(job = %id, locator = %job.locator, "narration queued");
        self.inner.emit(NarrationEvent::Queued {
            job: id,
            text: job.text.clone(),
        });

        locked(&self.inner.pending).push_back(QueuedJob {
            job,
            prefetch,
            epoch,
            cancel,
            done,
        });
        drop(generation);

        self.inner.wake.notify_one();
        Narration::new(id, rx)
    }

    /// Change the default voice for later jobs
    pub fn set_voice(&self, voice: VoiceSelection) {
        *locked(&self.inner.voice) = voice;
    }

    /// Drop every queued job, stop the current clip, and release this queue's
    /// cache claims
    ///
    /// Safe in any state and idempotent. The current job's claim is released
    /// by the worker once the clip is silenced.
    pub async fn force_stop(&self) {
        let discarded: Vec<QueuedJob> = {
            let mut epoch = locked(&self.inner.epoch);
            epoch.cancel();
            *epoch = self.inner.shutdown.child_token();
            locked(&self.inner.pending).drain(..).collect()
        };

        if !discarded.is_empty() {
            tracing::info!(count = discarded.len(), "discarding queued narration");
        }
        for queued in discarded {
            self.inner.discard(queued);
        }

        let mut player = self.inner.player.lock().await;
        // A job enqueued after the sweep may already own the output
        let stale = locked(&self.inner.current)
            .as_ref()
            .is_none_or(|current| current.epoch.is_cancelled());
        if stale {
            player.stop();
        }
    }

    /// Pause the current clip
    pub async fn pause(&self) {
        self.inner.player.lock().await.pause();
    }

    /// Resume a paused clip
    ///
    /// # Errors
    ///
    /// Returns error if the output refuses to restart
    pub async fn resume(&self) -> Result<()> {
        let mut player = self.inner.player.lock().await;
        if player.state() == PlayerState::Paused {
            player.play()?;
        }
        Ok(())
    }

    /// Stop the current job and move on to the next one
    ///
    /// The stopped job resolves with [`Error::Interrupted`].
    pub async fn stop_current(&self) {
        // Cancel first: the worker may hold the player for a slow load
        if let Some(current) = locked(&self.inner.current).as_ref() {
            tracing::info!(job = %current.job.id, "stopping current narration");
            current.cancel.cancel();
        }

        let mut player = self.inner.player.lock().await;
        // The next job may have taken the output in the meantime
        let stale = locked(&self.inner.current)
            .as_ref()
            .is_none_or(|current| current.cancel.is_cancelled());
        if stale {
            player.stop();
        }
    }

    /// Play head of the current clip, or `None` when nothing is narrating
    pub async fn position(&self) -> Option<Duration> {
        let player = self.inner.player.lock().await;
        match player.state() {
            PlayerState::Playing | PlayerState::Paused => Some(player.position()),
            _ => None,
        }
    }

    /// Snapshot of the job being narrated
    #[must_use]
    pub fn current_job(&self) -> Option<NarrationJob> {
        locked(&self.inner.current)
            .as_ref()
            .map(|current| current.job.clone())
    }

    /// Snapshot of the last job that ran, with its final status
    #[must_use]
    pub fn last_job(&self) -> Option<NarrationJob> {
        locked(&self.inner.last).clone()
    }

    /// Snapshot of jobs waiting for their turn
    ///
    /// Jobs whose clip is still downloading report [`JobStatus::Prefetching`].
    #[must_use]
    pub fn pending_jobs(&self) -> Vec<NarrationJob> {
        locked(&self.inner.pending)
            .iter()
            .map(|queued| {
                let mut job = queued.job.clone();
                job.status = prefetch_status(&queued.prefetch);
                job
            })
            .collect()
    }

    /// Number of jobs waiting for their turn
    #[must_use]
    pub fn pending_len(&self) -> usize {
        locked(&self.inner.pending).len()
    }

    /// Cache the queue downloads into
    #[must_use]
    pub fn cache(&self) -> &AudioCache {
        &self.inner.cache
    }

    /// Observe job lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.inner.events.subscribe()
    }
}

impl std::fmt::Debug for NarrationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationQueue")
            .field("pending", &self.pending_len())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PositionSource for NarrationQueue {
    async fn position(&self) -> Option<Duration> {
        Self::position(self).await
    }
}

fn prefetch_status(prefetch: &Prefetch) -> JobStatus {
    if prefetch.is_settled() {
        JobStatus::Queued
    } else {
        JobStatus::Prefetching
    }
}

/// Text as sent to the synthesis service
fn text_of(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn spawn_prefetch_notice(
    events: &broadcast::Sender<NarrationEvent>,
    job: Uuid,
    prefetch: &Prefetch,
    cancel: &CancellationToken,
) {
    let events = events.clone();
    let prefetch = prefetch.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            source = prefetch.source() => {
                let local = source.is_local();
                tracing::debug!(job = %job, local, "narration clip ready");
                let _ = events.send(NarrationEvent::Prefetched { job, local });
            }
        }
    });
}

impl Inner {
    fn emit(&self, event: NarrationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn next_job(&self) -> QueuedJob {
        loop {
            if let Some(queued) = locked(&self.pending).pop_front() {
                return queued;
            }
            self.wake.notified().await;
        }
    }

    fn discard(&self, queued: QueuedJob) {
        self.cache.release(queued.prefetch.claim());
        tracing::debug!(job = %queued.job.id, "narration discarded");
        self.emit(NarrationEvent::Discarded { job: queued.job.id });
        let _ = queued.done.send(Err(Error::Cancelled));
    }

    fn set_status(&self, status: JobStatus) {
        if let Some(current) = locked(&self.current).as_mut() {
            current.job.status = status;
        }
    }

    /// Play one job to its end and settle it
    async fn narrate(&self, queued: QueuedJob) {
        let QueuedJob {
            mut job,
            prefetch,
            epoch,
            cancel,
            done,
        } = queued;
        let id = job.id;

        if cancel.is_cancelled() {
            let reason = interruption(&epoch);
            self.cache.release(prefetch.claim());
            self.settle(id, reason, done);
            return;
        }

        job.status = prefetch_status(&prefetch);
        *locked(&self.current) = Some(CurrentJob {
            job,
            epoch: epoch.clone(),
            cancel: cancel.clone(),
        });

        let result = self.play(id, &prefetch, &epoch, &cancel).await;

        let status = if result.is_ok() {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        let finished = locked(&self.current).take().map(|mut current| {
            current.job.status = status;
            current.job
        });
        *locked(&self.last) = finished;
        self.cache.release(prefetch.claim());
        self.settle(id, result, done);
    }

    async fn play(
        &self,
        id: Uuid,
        prefetch: &Prefetch,
        epoch: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source = tokio::select! {
            biased;
            () = cancel.cancelled() => return interruption(epoch),
            source = prefetch.source() => source,
        };

        let finished = {
            let mut player = self.player.lock().await;
            let loaded = tokio::select! {
                biased;
                () = cancel.cancelled() => return interruption(epoch),
                loaded = player.replace(&source) => loaded,
            };
            loaded.map_err(|e| Error::Playback(format!("cannot load narration clip: {e}")))?;

            if cancel.is_cancelled() {
                return interruption(epoch);
            }
            player
                .play()
                .map_err(|e| Error::Playback(format!("cannot start narration clip: {e}")))?;
            player
                .finished()
                .ok_or_else(|| Error::Playback("playback did not start".to_string()))?
        };

        self.set_status(JobStatus::Playing);
        tracing::info!(job = %id, local = source.is_local(), "narration started");
        self.emit(NarrationEvent::Started { job: id });

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => PlaybackOutcome::Interrupted,
            outcome = finished.wait() => outcome,
        };

        match outcome {
            PlaybackOutcome::Completed => Ok(()),
            PlaybackOutcome::Interrupted => {
                // Silence the clip before the next job's turn
                self.player.lock().await.stop();
                interruption(epoch)
            }
        }
    }

    fn settle(&self, id: Uuid, result: Result<()>, done: oneshot::Sender<Result<()>>) {
        match &result {
            Ok(()) => {
                tracing::info!(job = %id, "narration finished");
                self.emit(NarrationEvent::Finished { job: id });
            }
            Err(Error::Cancelled) => {
                tracing::debug!(job = %id, "narration cancelled");
                self.emit(NarrationEvent::Discarded { job: id });
            }
            Err(e) => {
                tracing::warn!(job = %id, error = %e, "narration failed");
                self.emit(NarrationEvent::Failed {
                    job: id,
                    error: e.to_string(),
                });
            }
        }
        let _ = done.send(result);
    }

    async fn close(&self) {
        let remaining: Vec<QueuedJob> = locked(&self.pending).drain(..).collect();
        for queued in remaining {
            self.discard(queued);
        }
        self.player.lock().await.stop();
        tracing::debug!("narration worker stopped");
    }
}

fn interruption(epoch: &CancellationToken) -> Result<()> {
    if epoch.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Err(Error::Interrupted)
    }
}

async fn run(inner: Arc<Inner>) {
    loop {
        let queued = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            queued = inner.next_job() => queued,
        };
        inner.narrate(queued).await;
    }
    inner.close().await;
}
