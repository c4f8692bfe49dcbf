//! Recognition pipeline integration tests.
//!
//! Each test drives one or more deliveries through
//! dispatcher → queue → `RecognitionPipeline::run` with a scripted
//! recognizer and checks the task record the way a caller would see it.

mod common;

use common::{FailingObjectStore, FixedSplitter, Harness, RecordingProgress, RejectingSplitter};
use ocrflow::{
    CancelOutcome, ErrorKind, OcrflowError, PageSeparator, PageStatus, RecognitionError,
    RunOutcome, StatusReport, TaskStatus, TaskStore, TransitionFields, WorkItem, WorkQueue,
};
use std::sync::Arc;
use std::time::Duration;

// ── Concrete scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn single_image_succeeds_first_try() {
    let h = Harness::new(1);
    let (id, item) = h.submit().await;

    let outcome = h.pipeline.run(&item).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { degraded: false });

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.pages.len(), 1);
    assert_eq!(task.pages[0].status, PageStatus::Succeeded);
    assert_eq!(task.pages[0].attempts, 1);
    assert_eq!(task.result_ref.as_deref(), Some(format!("memory://{id}.txt").as_str()));
    assert_eq!(task.error, None);
    assert_eq!(
        h.objects.text_for(&format!("{id}.txt")).unwrap(),
        "--- page 1 ---\ntext 0"
    );
}

#[tokio::test]
async fn transient_timeouts_are_retried_per_page() {
    let h = Harness::new(3);
    h.recognizer.script(
        1,
        vec![
            Err(RecognitionError::transient("request timed out")),
            Err(RecognitionError::transient("request timed out")),
            Ok("second page".into()),
        ],
    );
    let (id, item) = h.submit().await;

    assert_eq!(
        h.pipeline.run(&item).await.unwrap(),
        RunOutcome::Completed { degraded: false }
    );

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let attempts: Vec<u32> = task.pages.iter().map(|p| p.attempts).collect();
    assert_eq!(attempts, vec![1, 3, 1]);
    assert_eq!(task.pages[1].text.as_deref(), Some("second page"));
    assert_eq!(h.recognizer.calls(), vec![0, 1, 1, 1, 2]);
}

#[tokio::test]
async fn cancel_after_first_page_leaves_rest_pending() {
    let h = Harness::new(3);
    let gate = h.recognizer.gate(0);
    let (id, item) = h.submit().await;

    let pipeline = h.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(&item).await });

    // Page 1 is in flight: the request is recorded, the call is not interrupted.
    gate.entered.notified().await;
    assert_eq!(h.cancels.request_cancel(id).await.unwrap(), CancelOutcome::Requested);
    gate.release.notify_one();

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Cancelled);

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    let statuses: Vec<PageStatus> = task.pages.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![PageStatus::Succeeded, PageStatus::Pending, PageStatus::Pending]
    );
    assert_eq!(h.recognizer.calls(), vec![0]);
    assert!(h.objects.puts().is_empty());
    assert_eq!(task.report(), StatusReport::Cancelled);
}

#[tokio::test]
async fn in_flight_page_completes_before_cancel_takes_effect() {
    let h = Harness::new(3);
    let gate = h.recognizer.gate(1);
    let (id, item) = h.submit().await;

    let pipeline = h.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.run(&item).await });

    gate.entered.notified().await;
    h.cancels.request_cancel(id).await.unwrap();
    // Repeating the request is harmless.
    assert_eq!(h.cancels.request_cancel(id).await.unwrap(), CancelOutcome::Requested);
    gate.release.notify_one();

    assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Cancelled);
    let task = h.store.get(id).await.unwrap();
    let statuses: Vec<PageStatus> = task.pages.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![PageStatus::Succeeded, PageStatus::Succeeded, PageStatus::Pending]
    );
}

// ── Aggregation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_permanent_failure_is_degraded_success() {
    let h = Harness::new(4);
    h.recognizer
        .script(2, vec![Err(RecognitionError::processing("HTTP 400: image too small"))]);
    let (id, item) = h.submit().await;

    assert_eq!(
        h.pipeline.run(&item).await.unwrap(),
        RunOutcome::Completed { degraded: true }
    );

    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.error.as_deref(), Some("1/4 pages failed: pages 3"));
    assert_eq!(task.pages[2].status, PageStatus::Failed);
    assert_eq!(task.pages[2].attempts, 1, "permanent errors are not retried");
    assert_eq!(
        task.pages[2].last_error.as_ref().unwrap().kind,
        ErrorKind::Processing
    );

    let text = h.objects.text_for(&format!("{id}.txt")).unwrap();
    assert!(text.contains("text 0") && text.contains("text 1") && text.contains("text 3"));
    assert!(!text.contains("text 2"));
    assert!(text.contains("failed pages: 3"), "{text}");

    match task.report() {
        StatusReport::Completed { result_ref, error } => {
            assert_eq!(result_ref, format!("memory://{id}.txt"));
            assert!(error.is_some());
        }
        other => panic!("expected completed, got {other:?}"),
    }
}

#[tokio::test]
async fn exhausted_retries_fail_the_page_not_the_task() {
    let h = Harness::new(2);
    h.recognizer
        .always_fail(0, RecognitionError::unavailable("connection refused"), 10);
    let (id, item) = h.submit().await;

    assert_eq!(
        h.pipeline.run(&item).await.unwrap(),
        RunOutcome::Completed { degraded: true }
    );
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.pages[0].attempts, 5);
    assert_eq!(h.recognizer.calls_for(0), 5);
    assert_eq!(task.pages[1].status, PageStatus::Succeeded);
}

#[tokio::test]
async fn every_page_failing_fails_the_task() {
    let h = Harness::new(3);
    for page in 0..3 {
        h.recognizer.script(
            page,
            vec![Err(RecognitionError::processing(format!("unreadable page {page}")))],
        );
    }
    let (id, item) = h.submit().await;

    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Failed);
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("processing_error: unreadable page 0"));
    assert_eq!(task.result_ref, None);
    assert!(h.objects.puts().is_empty());
}

#[tokio::test]
async fn rate_limited_page_waits_and_recovers() {
    let h = Harness::new(1);
    h.recognizer.script(
        0,
        vec![
            Err(RecognitionError::rate_limited("HTTP 429", Some(Duration::from_millis(3)))),
            Ok("after quota".into()),
        ],
    );
    let (id, item) = h.submit().await;

    h.pipeline.run(&item).await.unwrap();
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.pages[0].attempts, 2);
    assert_eq!(task.pages[0].text.as_deref(), Some("after quota"));
}

#[tokio::test]
async fn publish_failure_fails_after_recognition() {
    let h = Harness::build(
        Arc::new(FixedSplitter { pages: 2 }),
        Some(Arc::new(FailingObjectStore)),
        |p| p,
    );
    let (id, item) = h.submit().await;

    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Failed);
    let task = h.store.get(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.pages.iter().all(|p| p.status == PageStatus::Succeeded));
    let error = task.error.unwrap();
    assert!(error.starts_with("storage_error:"), "{error}");
    assert!(error.contains("bucket does not exist"));
}

#[tokio::test]
async fn unsplittable_source_fails_without_engine_calls() {
    let h = Harness::build(Arc::new(RejectingSplitter), None, |p| p);
    let (id, item) = h.submit().await;

    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Failed);
    let task = h.store.get(id).await.unwrap();
    assert!(task.error.unwrap().starts_with("unsupported_format:"));
    assert!(task.pages.is_empty());
    assert!(h.recognizer.calls().is_empty());
}

#[tokio::test]
async fn unreadable_source_fails_the_task() {
    let h = Harness::new(1);
    let (id, item) = h.submit().await;
    std::fs::remove_file(&item.source_ref).unwrap();

    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Failed);
    let task = h.store.get(id).await.unwrap();
    assert!(task.error.unwrap().contains("cannot read source"));
}

#[tokio::test]
async fn separator_and_source_removal_are_honoured() {
    let h = Harness::build(Arc::new(FixedSplitter { pages: 2 }), None, |p| {
        p.with_separator(PageSeparator::HorizontalRule)
            .with_remove_source_on_finish(true)
    });
    let (id, item) = h.submit().await;

    h.pipeline.run(&item).await.unwrap();
    assert_eq!(
        h.objects.text_for(&format!("{id}.txt")).unwrap(),
        "text 0\n\n---\n\ntext 1"
    );
    assert!(!std::path::Path::new(&item.source_ref).exists());
}

#[tokio::test]
async fn progress_events_follow_page_order() {
    let progress = Arc::new(RecordingProgress::default());
    let cb = progress.clone();
    let h = Harness::build(Arc::new(FixedSplitter { pages: 2 }), None, move |p| {
        p.with_progress(cb)
    });
    h.recognizer
        .script(1, vec![Err(RecognitionError::processing("blank"))]);
    let (_, item) = h.submit().await;

    h.pipeline.run(&item).await.unwrap();
    assert_eq!(
        *progress.events.lock().unwrap(),
        vec!["start 2", "page 1", "ok 1", "page 2", "err 2", "done completed 1"]
    );
}

// ── Idempotency and terminality ──────────────────────────────────────────────

#[tokio::test]
async fn redelivery_after_completion_is_discarded() {
    let h = Harness::new(2);
    let (id, item) = h.submit().await;

    h.pipeline.run(&item).await.unwrap();
    h.queue.redeliver(item.clone()).unwrap();
    let again = h.queue.next().await.unwrap();
    assert_eq!(h.pipeline.run(&again).await.unwrap(), RunOutcome::Discarded);

    assert_eq!(h.recognizer.calls(), vec![0, 1]);
    assert_eq!(h.objects.puts().len(), 1);
    assert_eq!(h.store.get(id).await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_process_once() {
    let h = Harness::new(3);
    let gate = h.recognizer.gate(0);
    let (id, item) = h.submit().await;

    let first = {
        let pipeline = h.pipeline.clone();
        let item = item.clone();
        tokio::spawn(async move { pipeline.run(&item).await })
    };
    gate.entered.notified().await;

    // The first worker holds the task in `processing`.
    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Discarded);
    gate.release.notify_one();
    assert_eq!(
        first.await.unwrap().unwrap(),
        RunOutcome::Completed { degraded: false }
    );

    assert_eq!(h.recognizer.calls(), vec![0, 1, 2]);
    assert_eq!(h.objects.puts().len(), 1);
    assert_eq!(h.store.get(id).await.unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn cancel_while_queued_discards_the_delivery() {
    let h = Harness::new(2);
    let (id, item) = h.submit().await;

    assert_eq!(h.cancels.request_cancel(id).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(h.pipeline.run(&item).await.unwrap(), RunOutcome::Discarded);
    assert!(h.recognizer.calls().is_empty());
    assert_eq!(h.store.get(id).await.unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn terminal_tasks_never_change() {
    let h = Harness::new(1);
    let (completed, item) = h.submit().await;
    h.pipeline.run(&item).await.unwrap();

    h.recognizer
        .script(0, vec![Err(RecognitionError::processing("blank"))]);
    let (failed, item) = h.submit().await;
    h.pipeline.run(&item).await.unwrap();

    for (id, status) in [(completed, TaskStatus::Completed), (failed, TaskStatus::Failed)] {
        assert_eq!(
            h.cancels.request_cancel(id).await.unwrap(),
            CancelOutcome::AlreadyTerminal(status)
        );
        for next in [TaskStatus::Processing, TaskStatus::Cancelled, TaskStatus::Completed] {
            let err = h
                .store
                .transition(id, status, next, TransitionFields::none())
                .await
                .unwrap_err();
            assert!(err.is_conflict(), "{status} → {next} must be rejected");
        }
        assert_eq!(h.store.get(id).await.unwrap().status, status);
    }
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = Harness::new(1);
    let err = h
        .cancels
        .request_cancel(ocrflow::TaskId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OcrflowError::TaskNotFound(_)));

    let stray = WorkItem {
        task_id: ocrflow::TaskId::new(),
        engine_kind: ocrflow::EngineKind::LocalOcr,
        source_ref: "missing.png".into(),
    };
    assert_eq!(h.pipeline.run(&stray).await.unwrap(), RunOutcome::Discarded);
}
