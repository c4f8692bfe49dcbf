//! Recognition Pipeline: turn one claimed task into a terminal result.
//!
//! ```text
//! queued ──CAS──▶ processing ──▶ read ──▶ split ──▶ [check cancel ─▶ recognize ⟲ retry ─▶ record]* ──▶ aggregate
//!                                                                                                      │
//!                                     completed (all / some pages)  ◀── publish ◀──────────────────────┤
//!                                     failed (no page, publish error) ◀────────────────────────────────┘
//! ```
//!
//! ## Idempotent pickup
//!
//! The first step is a `queued → processing` compare-and-swap. A duplicate
//! delivery of an item that another worker already claimed (or that was
//! cancelled while queued) loses the CAS and is discarded, so no page is
//! processed twice and nothing is published twice.
//!
//! ## Aggregation policy
//!
//! | Pages | Terminal status | `error` |
//! |-------|-----------------|---------|
//! | all succeeded | `completed` | none |
//! | some succeeded | `completed` (degraded) | `"F/N pages failed: pages a, b"` |
//! | none succeeded | `failed` | first page's error |
//! | publish failed | `failed` | the storage error |
//!
//! Every terminal write is itself a CAS from `processing`; losing it means
//! another actor already advanced the task, and this attempt is abandoned
//! without touching the record.

use crate::cancel::{lost_race, CancellationController};
use crate::config::PageSeparator;
use crate::dispatch::WorkItem;
use crate::engine::{EngineSet, Recognizer};
use crate::error::{ErrorKind, OcrflowError, RecognitionError, StoreError};
use crate::pipeline::split::Splitter;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::publish::ResultPublisher;
use crate::retry::{Classification, RetryPolicy};
use crate::store::{TaskStore, TransitionFields};
use crate::task::{PageResult, PageStatus, TaskId, TaskStatus};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one delivery of a work item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Pickup CAS lost: duplicate delivery or cancelled while queued.
    Discarded,
    Completed { degraded: bool },
    Failed,
    Cancelled,
    /// A later CAS was lost; another actor owns the task's final state.
    Aborted,
}

/// Why `process` stopped early.
enum Halt {
    Lost(StoreError),
    Fatal(OcrflowError),
}

impl From<StoreError> for Halt {
    fn from(e: StoreError) -> Self {
        if lost_race(&e) {
            Halt::Lost(e)
        } else {
            Halt::Fatal(e.into())
        }
    }
}

/// Everything a worker needs to run tasks end to end.
#[derive(Clone)]
pub struct RecognitionPipeline {
    store: Arc<dyn TaskStore>,
    engines: EngineSet,
    splitter: Arc<dyn Splitter>,
    retry: RetryPolicy,
    cancels: CancellationController,
    publisher: ResultPublisher,
    separator: PageSeparator,
    progress: ProgressCallback,
    remove_source_on_finish: bool,
}

impl RecognitionPipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        engines: EngineSet,
        splitter: Arc<dyn Splitter>,
        cancels: CancellationController,
        publisher: ResultPublisher,
    ) -> Self {
        Self {
            store,
            engines,
            splitter,
            retry: RetryPolicy::default(),
            cancels,
            publisher,
            separator: PageSeparator::default(),
            progress: Arc::new(NoopProgressCallback),
            remove_source_on_finish: false,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_separator(mut self, separator: PageSeparator) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_remove_source_on_finish(mut self, v: bool) -> Self {
        self.remove_source_on_finish = v;
        self
    }

    /// Process one delivery of `item`.
    ///
    /// Task-level outcomes (including recognition and publish failures) are
    /// written to the store and reported as `Ok`; `Err` means the store
    /// itself failed and the task could not be driven to a terminal state.
    pub async fn run(&self, item: &WorkItem) -> Result<RunOutcome, OcrflowError> {
        let id = item.task_id;

        // ── Step 1: Claim ────────────────────────────────────────────────
        match self
            .store
            .transition(id, TaskStatus::Queued, TaskStatus::Processing, TransitionFields::none())
            .await
        {
            Ok(_) => {}
            Err(e) if lost_race(&e) => {
                debug!(task_id = %id, "Discarding delivery: {}", e);
                return Ok(RunOutcome::Discarded);
            }
            Err(e) => return Err(e.into()),
        }
        info!(task_id = %id, engine = %item.engine_kind, "Processing {}", item.source_ref);

        let start = Instant::now();
        let token = self.cancels.token(id);
        let result = self.process(item, &token).await;
        self.cancels.release(id);

        match result {
            Ok(outcome) => {
                info!(
                    task_id = %id,
                    ?outcome,
                    "Task finished in {}ms",
                    start.elapsed().as_millis()
                );
                if self.remove_source_on_finish {
                    if let Err(e) = tokio::fs::remove_file(&item.source_ref).await {
                        warn!(task_id = %id, "Could not remove source {}: {}", item.source_ref, e);
                    }
                }
                Ok(outcome)
            }
            Err(Halt::Lost(e)) => {
                warn!(task_id = %id, "Abandoning attempt after lost race: {}", e);
                Ok(RunOutcome::Aborted)
            }
            Err(Halt::Fatal(e)) => {
                error!(task_id = %id, "Task store failure: {}", e);
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        item: &WorkItem,
        token: &CancellationToken,
    ) -> Result<RunOutcome, Halt> {
        let id = item.task_id;

        // ── Step 2: Read source ──────────────────────────────────────────
        let source = match tokio::fs::read(&item.source_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let msg = format!(
                    "{}: cannot read source '{}': {}",
                    ErrorKind::Processing,
                    item.source_ref,
                    e
                );
                return self.fail(id, msg, 0).await;
            }
        };

        // ── Step 3: Split ────────────────────────────────────────────────
        let splitter = self.splitter.clone();
        let units = match tokio::task::spawn_blocking(move || splitter.split(&source)).await {
            Ok(Ok(units)) if units.is_empty() => {
                let e = RecognitionError::unsupported_format("document has no pages");
                return self.fail(id, e.to_string(), 0).await;
            }
            Ok(Ok(units)) => units,
            Ok(Err(e)) => return self.fail(id, e.to_string(), 0).await,
            Err(join) => {
                return self
                    .fail(id, format!("internal error: splitter panicked: {}", join), 0)
                    .await
            }
        };
        let total = units.len();
        debug!(task_id = %id, "Split into {} unit(s)", total);

        // ── Step 4: Record every unit as pending ─────────────────────────
        let mut pages: Vec<PageResult> = units.iter().map(|u| PageResult::pending(u.index)).collect();
        for page in &pages {
            self.store.append_page_result(id, page.clone()).await?;
        }
        self.progress.on_task_start(id, total);

        // ── Step 5: Recognise page by page ───────────────────────────────
        let recognizer: &dyn Recognizer = self.engines.get(item.engine_kind).as_ref();
        for (slot, unit) in units.iter().enumerate() {
            if token.is_cancelled() {
                return self.cancel(id, unit.index, &pages).await;
            }

            let page_num = unit.index + 1;
            self.progress.on_page_start(id, page_num, total);
            let attempted = self
                .retry
                .execute(
                    move |_| recognizer.recognize(unit),
                    |e: &RecognitionError| Classification {
                        kind: e.kind,
                        retry_after: e.retry_after(),
                    },
                )
                .await;

            let result = match attempted.result {
                Ok(text) => {
                    debug!(task_id = %id, page = page_num, attempts = attempted.attempts, "Page recognised");
                    self.progress.on_page_complete(id, page_num, total, text.len());
                    PageResult::succeeded(unit.index, text, attempted.attempts)
                }
                Err(e) => {
                    warn!(
                        task_id = %id,
                        page = page_num,
                        attempts = attempted.attempts,
                        kind = %e.kind,
                        "Page failed: {}", e.message
                    );
                    self.progress.on_page_error(id, page_num, total, &e.to_string());
                    PageResult::failed(unit.index, e, attempted.attempts)
                }
            };
            self.store.append_page_result(id, result.clone()).await?;
            pages[slot] = result;
        }

        // Last boundary: a cancel that arrived during the final page.
        if token.is_cancelled() {
            return self.cancel(id, total, &pages).await;
        }

        // ── Step 6: Aggregate ────────────────────────────────────────────
        self.aggregate(id, &pages).await
    }

    async fn aggregate(&self, id: TaskId, pages: &[PageResult]) -> Result<RunOutcome, Halt> {
        let total = pages.len();
        let failed: Vec<&PageResult> = pages.iter().filter(|p| p.status == PageStatus::Failed).collect();
        let succeeded = total - failed.len();

        if succeeded == 0 {
            let first = failed
                .first()
                .and_then(|p| p.last_error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no page produced text".to_string());
            return self.fail(id, first, 0).await;
        }

        let degraded = (!failed.is_empty()).then(|| degraded_message(&failed, total));
        let text = assemble_text(pages, &self.separator);

        let url = match self.publisher.publish(id, &text).await {
            Ok(url) => url,
            Err(e) => {
                let msg = format!("{}: {}", ErrorKind::Storage, e);
                return self.fail(id, msg, succeeded).await;
            }
        };

        let mut fields = TransitionFields::none().result_ref(url);
        if let Some(msg) = &degraded {
            warn!(task_id = %id, "Completed with failures: {}", msg);
            fields = fields.error(msg.clone());
        }
        self.finish(id, TaskStatus::Completed, fields, succeeded).await?;
        Ok(RunOutcome::Completed {
            degraded: degraded.is_some(),
        })
    }

    async fn cancel(
        &self,
        id: TaskId,
        next_index: usize,
        pages: &[PageResult],
    ) -> Result<RunOutcome, Halt> {
        info!(task_id = %id, "Cancellation observed before page {}", next_index + 1);
        let succeeded = pages.iter().filter(|p| p.status == PageStatus::Succeeded).count();
        self.finish(id, TaskStatus::Cancelled, TransitionFields::none(), succeeded)
            .await?;
        Ok(RunOutcome::Cancelled)
    }

    async fn fail(&self, id: TaskId, error: String, succeeded: usize) -> Result<RunOutcome, Halt> {
        error!(task_id = %id, "Task failed: {}", error);
        self.finish(id, TaskStatus::Failed, TransitionFields::none().error(error), succeeded)
            .await?;
        Ok(RunOutcome::Failed)
    }

    async fn finish(
        &self,
        id: TaskId,
        next: TaskStatus,
        fields: TransitionFields,
        succeeded: usize,
    ) -> Result<(), Halt> {
        self.store
            .transition(id, TaskStatus::Processing, next, fields)
            .await?;
        self.progress.on_task_complete(id, next, succeeded);
        Ok(())
    }
}

impl std::fmt::Debug for RecognitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionPipeline")
            .field("engines", &self.engines)
            .field("retry", &self.retry)
            .field("separator", &self.separator)
            .field("remove_source_on_finish", &self.remove_source_on_finish)
            .finish_non_exhaustive()
    }
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// `"2/5 pages failed: pages 2, 4"` (1-based page numbers).
fn degraded_message(failed: &[&PageResult], total: usize) -> String {
    format!(
        "{}/{} pages failed: pages {}",
        failed.len(),
        total,
        join_page_nums(failed.iter().copied())
    )
}

fn join_page_nums<'a>(pages: impl Iterator<Item = &'a PageResult>) -> String {
    pages
        .map(|p| p.page_num().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Join succeeded pages in index order; append a summary when any failed.
pub fn assemble_text(pages: &[PageResult], separator: &PageSeparator) -> String {
    let mut out = String::new();
    let mut first = true;
    for page in pages.iter().filter(|p| p.status == PageStatus::Succeeded) {
        out.push_str(&separator.render(page.page_num(), first));
        out.push_str(page.text.as_deref().unwrap_or_default());
        first = false;
    }

    let failed: Vec<&PageResult> = pages.iter().filter(|p| p.status == PageStatus::Failed).collect();
    if !failed.is_empty() {
        out.push_str(&format!(
            "\n\n--- summary ---\ntotal pages: {}\nsucceeded: {}\nfailed pages: {}\n",
            pages.len(),
            pages.len() - failed.len(),
            join_page_nums(failed.into_iter())
        ));
    }
    out
}
