//! Narration jobs and their lifecycle events

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::voice::Locator;
use crate::{Error, Result};

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its turn with its clip ready
    Queued,
    /// Clip still downloading
    Prefetching,
    /// Audio is playing
    Playing,
    /// Played to the end
    Done,
    /// Failed, interrupted, or discarded
    Failed,
}

/// One narration request
#[derive(Debug, Clone, Serialize)]
pub struct NarrationJob {
    /// Job identifier
    pub id: Uuid,
    /// Text being narrated
    pub text: String,
    /// Synthesis locator derived from the text and voice
    pub locator: Locator,
    /// Cache key of the locator
    pub cache_key: String,
    /// Current status
    pub status: JobStatus,
}

impl NarrationJob {
    pub(super) fn new(text: String, locator: Locator) -> Self {
        Self {
            id: Uuid::new_v4(),
            cache_key: locator.cache_key(),
            text,
            locator,
            status: JobStatus::Prefetching,
        }
    }
}

/// Queue lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarrationEvent {
    /// A job was accepted
    Queued {
        /// Job id
        job: Uuid,
        /// Text to narrate
        text: String,
    },
    /// A job's download settled
    Prefetched {
        /// Job id
        job: Uuid,
        /// Whether the clip is on disk (otherwise it streams)
        local: bool,
    },
    /// A job's audio started playing
    Started {
        /// Job id
        job: Uuid,
    },
    /// A job played to the end
    Finished {
        /// Job id
        job: Uuid,
    },
    /// A job could not be played or was stopped
    Failed {
        /// Job id
        job: Uuid,
        /// What went wrong
        error: String,
    },
    /// A job was dropped by a force stop
    Discarded {
        /// Job id
        job: Uuid,
    },
}

/// Completion of one enqueued narration
///
/// Resolves once the job's audio finished playing, or with the reason it
/// never did. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct Narration {
    id: Uuid,
    rx: oneshot::Receiver<Result<()>>,
}

impl Narration {
    pub(super) const fn new(id: Uuid, rx: oneshot::Receiver<Result<()>>) -> Self {
        Self { id, rx }
    }

    /// Id of the job this narration tracks
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for Narration {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Cancelled)))
    }
}
