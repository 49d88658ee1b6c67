//! Narration queue integration tests
//!
//! Runs the queue against scripted downloads and a recording audio output.

use std::time::Duration;

use story_narrator::{Error, JobStatus, NarrationEvent};

mod common;

use common::{
    RecordingOutput, ScriptedFetcher, cache_in, files_in, narrator, narrator_over, wait_until,
};

#[tokio::test]
async fn test_playback_follows_enqueue_order_when_later_downloads_finish_first() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let gate_a = fetcher.gate("A");
    let gate_b = fetcher.gate("B");
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let a = queue.enqueue("A");
    let b = queue.enqueue("B");
    let c = queue.enqueue("C");

    wait_until("C downloaded", || fetcher.completed() == ["C"]).await;
    gate_b.notify_one();
    wait_until("B downloaded", || fetcher.completed() == ["C", "B"]).await;
    assert!(output.starts().is_empty(), "nothing plays before A is ready");

    gate_a.notify_one();
    a.await.unwrap();
    b.await.unwrap();
    c.await.unwrap();

    assert_eq!(output.starts(), ["A", "B", "C"]);
    assert_eq!(output.loads(), ["A", "B", "C"]);
}

#[tokio::test]
async fn test_all_downloads_start_on_enqueue() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let _first = queue.enqueue("one");
    let _second = queue.enqueue("two");
    let _third = queue.enqueue("three");

    wait_until("first clip playing", || output.starts() == ["one"]).await;
    wait_until("all prefetched", || fetcher.completed().len() == 3).await;
    assert_eq!(queue.pending_len(), 2);
    assert_eq!(output.starts(), ["one"], "one clip at a time");
}

#[tokio::test]
async fn test_next_job_waits_for_finish() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let first = queue.enqueue("first");
    let second = queue.enqueue("second");

    wait_until("first playing", || output.starts() == ["first"]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(output.starts(), ["first"]);

    assert!(output.finish());
    first.await.unwrap();
    wait_until("second playing", || output.starts() == ["first", "second"]).await;
    assert!(output.finish());
    second.await.unwrap();
}

#[tokio::test]
async fn test_same_text_shares_one_download() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let gate = fetcher.gate("again");
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let first = queue.enqueue("again");
    let second = queue.enqueue("again");
    gate.notify_one();

    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(fetcher.started(), ["again"]);
    assert_eq!(output.starts(), ["again", "again"]);
    assert!(queue.cache().is_empty());
    assert!(files_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_force_stop_discards_queued_jobs() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let a = queue.enqueue("A");
    let b = queue.enqueue("B");
    let c = queue.enqueue("C");
    wait_until("A playing", || output.starts() == ["A"]).await;
    wait_until("all prefetched", || fetcher.completed().len() == 3).await;

    queue.force_stop().await;
    queue.force_stop().await;

    assert!(matches!(a.await, Err(Error::Cancelled)));
    assert!(matches!(b.await, Err(Error::Cancelled)));
    assert!(matches!(c.await, Err(Error::Cancelled)));
    assert!(!output.finish(), "no listener survives a force stop");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(output.starts(), ["A"]);
    assert_eq!(queue.pending_len(), 0);
    assert!(queue.cache().is_empty());
    assert!(files_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_force_stop_before_download_settles_leaves_nothing_behind() {
    let tmp = tempfile::TempDir::new().unwrap();
    let cache_dir = tmp.path().join("narration");
    let fetcher = ScriptedFetcher::new();
    let gate = fetcher.gate("hello");
    let output = RecordingOutput::auto();
    let queue = narrator(&cache_dir, fetcher.clone(), output.clone());

    let hello = queue.enqueue("hello");
    queue.force_stop().await;
    assert!(matches!(hello.await, Err(Error::Cancelled)));

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(output.calls().is_empty(), "player never touched: {:?}", output.calls());
    assert!(fetcher.completed().is_empty());
    assert!(files_in(&cache_dir).is_empty());
    assert!(queue.cache().is_empty());
}

#[tokio::test]
async fn test_force_stop_keeps_entries_of_queues_sharing_the_cache() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let cache = cache_in(tmp.path(), fetcher.clone());
    let mine_output = RecordingOutput::manual();
    let theirs_output = RecordingOutput::manual();
    let mine = narrator_over(cache.clone(), mine_output.clone());
    let theirs = narrator_over(cache.clone(), theirs_output.clone());

    let own = mine.enqueue("own");
    let own_shared = mine.enqueue("shared");
    let first = theirs.enqueue("first");
    let shared = theirs.enqueue("shared");

    wait_until("both playing", || {
        mine_output.starts() == ["own"] && theirs_output.starts() == ["first"]
    })
    .await;
    wait_until("all downloaded", || fetcher.completed().len() == 3).await;
    assert_eq!(fetcher.started().len(), 3, "shared text downloads once");

    mine.force_stop().await;
    assert!(matches!(own.await, Err(Error::Cancelled)));
    assert!(matches!(own_shared.await, Err(Error::Cancelled)));
    assert_eq!(cache.len(), 2);
    assert_eq!(files_in(tmp.path()).len(), 2);

    assert!(theirs_output.finish());
    first.await.unwrap();
    wait_until("shared playing", || theirs_output.starts() == ["first", "shared"]).await;
    assert!(theirs_output.calls().contains(&"local shared".to_string()));
    assert!(theirs_output.finish());
    shared.await.unwrap();

    assert!(cache.is_empty());
    assert!(files_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_pending_jobs_report_download_progress() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let gate = fetcher.gate("slow");
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let _playing = queue.enqueue("now");
    let _slow = queue.enqueue("slow");
    let _ready = queue.enqueue("ready");
    wait_until("now playing", || output.starts() == ["now"]).await;

    let statuses = |queue: &story_narrator::NarrationQueue| {
        queue
            .pending_jobs()
            .iter()
            .map(|job| (job.text.clone(), job.status))
            .collect::<Vec<_>>()
    };
    wait_until("ready downloaded", || {
        statuses(&queue)
            == [
                ("slow".to_string(), JobStatus::Prefetching),
                ("ready".to_string(), JobStatus::Queued),
            ]
    })
    .await;
    assert!(!fetcher.completed().contains(&"slow".to_string()));

    gate.notify_one();
    wait_until("slow downloaded", || {
        statuses(&queue).first().map(|(_, status)| *status) == Some(JobStatus::Queued)
    })
    .await;
}

#[tokio::test]
async fn test_queue_accepts_work_after_force_stop() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    queue.force_stop().await;
    queue.enqueue("after").await.unwrap();
    assert_eq!(output.starts(), ["after"]);
}

#[tokio::test]
async fn test_failed_download_streams_from_locator() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.fail("offline");
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    queue.enqueue("offline").await.unwrap();

    assert!(output.calls().contains(&"remote offline".to_string()));
    assert_eq!(output.starts(), ["offline"]);
    assert!(files_in(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_stop_current_interrupts_and_advances() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let first = queue.enqueue("first");
    let second = queue.enqueue("second");
    wait_until("first playing", || output.starts() == ["first"]).await;

    queue.stop_current().await;
    assert!(matches!(first.await, Err(Error::Interrupted)));

    wait_until("second playing", || output.starts() == ["first", "second"]).await;
    assert!(output.finish());
    second.await.unwrap();
}

#[tokio::test]
async fn test_pause_and_resume_current_clip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::manual();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let story = queue.enqueue("story");
    wait_until("playing", || output.starts() == ["story"]).await;

    output.advance(Duration::from_millis(750));
    assert_eq!(queue.position().await, Some(Duration::from_millis(750)));
    let job = queue.current_job().unwrap();
    assert_eq!(job.status, JobStatus::Playing);
    assert_eq!(job.text, "story");

    queue.pause().await;
    queue.pause().await;
    assert_eq!(queue.position().await, Some(Duration::from_millis(750)));
    queue.resume().await.unwrap();
    queue.resume().await.unwrap();

    let calls = output.calls();
    assert_eq!(calls.iter().filter(|c| *c == "pause story").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "resume story").count(), 1);

    assert!(output.finish());
    story.await.unwrap();
    assert_eq!(queue.position().await, None);
    assert!(queue.current_job().is_none());
}

#[tokio::test]
async fn test_lifecycle_events() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());
    let mut events = queue.subscribe();

    let narration = queue.enqueue("hi");
    let id = narration.id();
    narration.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert_eq!(
        seen.first(),
        Some(&NarrationEvent::Queued {
            job: id,
            text: "hi".to_string()
        })
    );
    assert!(seen.contains(&NarrationEvent::Prefetched { job: id, local: true }));
    let started = seen
        .iter()
        .position(|e| *e == NarrationEvent::Started { job: id })
        .unwrap();
    let finished = seen
        .iter()
        .position(|e| *e == NarrationEvent::Finished { job: id })
        .unwrap();
    assert!(started < finished);
}

#[tokio::test]
async fn test_dropping_queue_cancels_pending_work() {
    let tmp = tempfile::TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new();
    let _gate = fetcher.gate("never");
    let output = RecordingOutput::auto();
    let queue = narrator(tmp.path(), fetcher.clone(), output.clone());

    let never = queue.enqueue("never");
    let later = queue.enqueue("later");
    drop(queue);

    assert!(matches!(never.await, Err(Error::Cancelled)));
    assert!(matches!(later.await, Err(Error::Cancelled)));
    assert!(output.starts().is_empty());
}
