//! Audio file cache
//!
//! Maps a remote locator to a locally downloaded clip. Concurrent prefetches of
//! the same locator share one download. Every prefetch hands out a
//! [`CacheClaim`]; the file is deleted once the last claim is released.
//!
//! A download that fails or times out resolves to the remote locator itself so
//! playback can fall back to streaming. Cleanup failures are logged and
//! swallowed.

mod fetch;

pub use fetch::HttpFetcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::voice::Locator;

/// Where a clip's audio can be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Downloaded file in the cache directory
    Local(PathBuf),
    /// Original locator, streamed directly
    Remote(Locator),
}

impl AudioSource {
    /// Whether this source is a downloaded file
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Downloads a locator into a local file
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Write the audio behind `locator` to `dest`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the file cannot be written
    async fn fetch(&self, locator: &Locator, dest: &Path) -> Result<()>;
}

/// A holder's interest in a cache entry
///
/// Claims are tied to the entry generation they were issued for; releasing a
/// claim whose entry was already cleared is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheClaim {
    locator: Locator,
    entry: u64,
}

impl CacheClaim {
    /// Locator this claim refers to
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }
}

/// Snapshot of one cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Remote locator
    pub source_locator: Locator,
    /// Download target in the cache directory
    pub local_path: PathBuf,
    /// When the first prefetch created the entry
    pub created_at: DateTime<Utc>,
    /// Outstanding claims
    pub claims: usize,
    /// Whether the download has settled
    pub settled: bool,
}

type SharedSource = Shared<BoxFuture<'static, AudioSource>>;

/// A started (or joined) prefetch
#[derive(Clone)]
pub struct Prefetch {
    claim: CacheClaim,
    ready: SharedSource,
}

impl Prefetch {
    /// Claim to hand back to [`AudioCache::release`]
    #[must_use]
    pub const fn claim(&self) -> &CacheClaim {
        &self.claim
    }

    /// Whether the download has settled
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.ready.peek().is_some()
    }

    /// Wait for the download to settle
    pub async fn source(&self) -> AudioSource {
        self.ready.clone().await
    }
}

impl std::fmt::Debug for Prefetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetch")
            .field("claim", &self.claim)
            .finish_non_exhaustive()
    }
}

struct Slot {
    id: u64,
    local_path: PathBuf,
    created_at: DateTime<Utc>,
    claims: usize,
    settled: Option<AudioSource>,
    ready: SharedSource,
    cancel: CancellationToken,
}

struct CacheInner {
    dir: PathBuf,
    fetcher: Arc<dyn AudioFetcher>,
    timeout: Duration,
    entries: Mutex<HashMap<Locator, Slot>>,
    next_id: AtomicU64,
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<Locator, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deduplicating download cache for narration clips
#[derive(Clone)]
pub struct AudioCache {
    inner: Arc<CacheInner>,
}

impl AudioCache {
    /// Create a cache writing into `dir`
    pub fn new(dir: impl Into<PathBuf>, fetcher: Arc<dyn AudioFetcher>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                dir: dir.into(),
                fetcher,
                timeout,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Cache directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Start downloading `locator`, or join the download already under way
    ///
    /// Must be called from within a Tokio runtime.
    pub fn prefetch(&self, locator: &Locator) -> Prefetch {
        let mut entries = self.inner.entries();

        if let Some(slot) = entries.get_mut(locator) {
            slot.claims += 1;
            tracing::debug!(%locator, claims = slot.claims, "joined cached narration clip");
            return Prefetch {
                claim: CacheClaim {
                    locator: locator.clone(),
                    entry: slot.id,
                },
                ready: slot.ready.clone(),
            };
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let local_path = self
            .inner
            .dir
            .join(format!("{}-{id}.mp3", locator.cache_key()));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(download(
            Arc::clone(&self.inner),
            locator.clone(),
            id,
            local_path.clone(),
            cancel.clone(),
        ));
        let fallback = locator.clone();
        let ready = task
            .map(move |joined| joined.unwrap_or(AudioSource::Remote(fallback)))
            .boxed()
            .shared();

        tracing::debug!(%locator, path = %local_path.display(), "prefetching narration clip");

        entries.insert(
            locator.clone(),
            Slot {
                id,
                local_path,
                created_at: Utc::now(),
                claims: 1,
                settled: None,
                ready: ready.clone(),
                cancel,
            },
        );

        Prefetch {
            claim: CacheClaim {
                locator: locator.clone(),
                entry: id,
            },
            ready,
        }
    }

    /// Give back a claim; the last release deletes the downloaded file
    pub fn release(&self, claim: &CacheClaim) {
        let removed = {
            let mut entries = self.inner.entries();
            match entries.get_mut(&claim.locator) {
                Some(slot) if slot.id == claim.entry => {
                    slot.claims = slot.claims.saturating_sub(1);
                    if slot.claims == 0 {
                        entries.remove(&claim.locator)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(slot) = removed {
            tracing::debug!(locator = %claim.locator, "released narration clip");
            discard(slot);
        }
    }

    /// Drop every entry, deleting downloaded files and cancelling downloads
    pub fn clear(&self) {
        let drained: Vec<Slot> = self.inner.entries().drain().map(|(_, slot)| slot).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "clearing narration cache");
        }
        for slot in drained {
            discard(slot);
        }
    }

    /// Snapshot of current entries
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.inner
            .entries()
            .iter()
            .map(|(locator, slot)| CacheEntry {
                source_locator: locator.clone(),
                local_path: slot.local_path.clone(),
                created_at: slot.created_at,
                claims: slot.claims,
                settled: slot.settled.is_some(),
            })
            .collect()
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AudioCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCache")
            .field("dir", &self.inner.dir)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Tear down a slot that left the map
///
/// Settled downloads are deleted here; in-flight ones are cancelled and
/// clean up after themselves once they notice the slot is gone.
fn discard(slot: Slot) {
    match slot.settled {
        Some(AudioSource::Local(path)) => remove_quietly(&path),
        Some(AudioSource::Remote(_)) => {}
        None => slot.cancel.cancel(),
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "deleted narration clip"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete narration clip");
        }
    }
}

async fn download(
    inner: Arc<CacheInner>,
    locator: Locator,
    id: u64,
    path: PathBuf,
    cancel: CancellationToken,
) -> AudioSource {
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = fetch_within(&inner, &locator, &path) => Some(result),
    };

    let source = match outcome {
        Some(Ok(())) => AudioSource::Local(path.clone()),
        Some(Err(e)) => {
            tracing::warn!(%locator, error = %e, "narration download failed, streaming instead");
            remove_quietly(&path);
            AudioSource::Remote(locator.clone())
        }
        None => {
            tracing::debug!(%locator, "narration download cancelled");
            remove_quietly(&path);
            return AudioSource::Remote(locator);
        }
    };

    // The slot may have been released while the download was running
    let live = {
        let mut entries = inner.entries();
        match entries.get_mut(&locator) {
            Some(slot) if slot.id == id => {
                slot.settled = Some(source.clone());
                true
            }
            _ => false,
        }
    };

    if live {
        return source;
    }
    if let AudioSource::Local(path) = &source {
        tracing::debug!(%locator, "narration clip no longer needed");
        remove_quietly(path);
    }
    AudioSource::Remote(locator)
}

async fn fetch_within(inner: &CacheInner, locator: &Locator, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(&inner.dir).await?;
    tokio::time::timeout(inner.timeout, inner.fetcher.fetch(locator, path))
        .await
        .map_err(|_| {
            crate::Error::Download(format!("timed out after {}ms", inner.timeout.as_millis()))
        })?
}
