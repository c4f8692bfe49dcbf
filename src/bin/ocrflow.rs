//! CLI binary for ocrflow.
//!
//! A thin shim over the library crate: maps flags onto `ServiceConfig`,
//! runs a local worker pool over the given files and prints each task's
//! status as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use ocrflow::prompts::LAYOUT_EXTRACTION_PROMPT;
use ocrflow::{
    Engine, EngineKind, FileTaskStore, ObjectStoreBackend, OcrService, PageSeparator,
    ServiceConfig, TaskId, TaskProgressCallback, TaskStatus, TaskStore,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Last 8 hex digits; v7 ids share their timestamp prefix within a run.
fn short(id: TaskId) -> String {
    let s = id.to_string();
    s[s.len().saturating_sub(8)..].to_string()
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for all pages of all tasks; pages from different workers
/// interleave, so every log line names its task.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<(TaskId, usize), Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Recognising");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, task: TaskId, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(task, page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TaskProgressCallback for CliProgressCallback {
    fn on_task_start(&self, task: TaskId, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.println(format!(
            "{} task {}  {} page(s)",
            cyan("◆"),
            short(task),
            total_pages
        ));
    }

    fn on_page_start(&self, task: TaskId, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((task, page_num), Instant::now());
    }

    fn on_page_complete(&self, task: TaskId, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed(task, page_num);
        self.bar.println(format!(
            "  {} {}  page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            short(task),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, task: TaskId, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed(task, page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  page {:>3}/{:<3}  {}  {}",
            red("✗"),
            short(task),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_task_complete(&self, task: TaskId, status: TaskStatus, succeeded_pages: usize) {
        let mark = match status {
            TaskStatus::Completed => green("✔"),
            TaskStatus::Cancelled => cyan("⊘"),
            _ => red("✘"),
        };
        self.bar.println(format!(
            "{} task {}  {}  ({} page(s) recognised)",
            mark,
            short(task),
            status,
            succeeded_pages
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognise a scanned PDF with tesseract
  ocrflow run scan.pdf

  # Two files through the hosted model, 8 workers
  ocrflow run --engine remote-multimodal --workers 8 a.pdf b.png

  # Local Ollama model, keep line layout
  ocrflow run --engine local-multimodal --preserve-layout invoice.jpg

  # Inspect earlier runs
  ocrflow status
  ocrflow status 01928c3e-7f4a-7c1d-9a0b-3f2e5d6c7b8a

  # Check which engines are usable on this machine
  ocrflow probe

ENVIRONMENT VARIABLES:
  OCRFLOW_WORKERS          Worker pool size (default 4)
  OCRFLOW_TESSERACT_BIN    tesseract binary (default: tesseract on PATH)
  OCRFLOW_TESSERACT_LANGS  tesseract languages (default chi_sim+eng)
  OCRFLOW_REMOTE_API_URL   OpenAI-compatible base URL (default SiliconFlow)
  OCRFLOW_REMOTE_API_KEY   API key for the remote engine (or SILICON_FLOW_API_KEY)
  OCRFLOW_REMOTE_MODEL     Remote model id
  OLLAMA_BASE_URL          Ollama server (default http://localhost:11434)
  OCRFLOW_OLLAMA_MODEL     Ollama model (default llama3.2-vision:11b)
  MINIO_ENDPOINT           Publish results to MinIO/S3 instead of a directory
  MINIO_ACCESS_KEY / MINIO_SECRET_KEY / MINIO_BUCKET_NAME / MINIO_REGION / MINIO_SECURE
  OCRFLOW_OUTPUT_DIR       Directory for results when MinIO is not configured
  RUST_LOG                 Log filter (default ocrflow=info)
"#;

/// Asynchronous document text recognition.
#[derive(Parser, Debug)]
#[command(
    name = "ocrflow",
    version,
    about = "Recognise text in PDFs and images with tesseract or multimodal models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCRFLOW_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit files, run the worker pool until every task is terminal.
    Run(RunArgs),
    /// Show stored tasks.
    Status {
        /// Task id; omit to list every task.
        id: Option<TaskId>,

        /// Directory holding task records.
        #[arg(long, env = "OCRFLOW_STORE_DIR", default_value = ".ocrflow/tasks")]
        store_dir: PathBuf,
    },
    /// Report which engines are usable.
    Probe,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// PDF or image files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// local-ocr, remote-multimodal or local-multimodal.
    #[arg(short, long, env = "OCRFLOW_ENGINE", default_value = "local-ocr")]
    engine: EngineKind,

    /// Worker pool size (overrides OCRFLOW_WORKERS).
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..=256))]
    workers: Option<u16>,

    /// Directory holding task records.
    #[arg(long, env = "OCRFLOW_STORE_DIR", default_value = ".ocrflow/tasks")]
    store_dir: PathBuf,

    /// Write results to this directory (overrides OCRFLOW_OUTPUT_DIR / MinIO).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Page separator: none, page-header, rule, or custom string.
    #[arg(long, env = "OCRFLOW_SEPARATOR")]
    separator: Option<PageSeparator>,

    /// Ask multimodal engines to keep line layout.
    #[arg(long)]
    preserve_layout: bool,

    /// Disable progress bar.
    #[arg(long, env = "OCRFLOW_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries per-page feedback; keep library logs quiet
    // under it unless asked.
    let quiet_logs = matches!(&cli.command, Command::Run(args) if !args.no_progress);
    let filter = if cli.verbose {
        "ocrflow=debug"
    } else if quiet_logs {
        "ocrflow=warn"
    } else {
        "ocrflow=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Status { id, store_dir } => status(id, store_dir).await,
        Command::Probe => probe().await,
    }
}

/// Map CLI args onto the environment-derived `ServiceConfig`.
fn build_config(args: &RunArgs) -> Result<(ServiceConfig, Option<Arc<CliProgressCallback>>)> {
    let mut builder = ServiceConfig::builder();
    let base = ServiceConfig::from_env().context("Invalid environment configuration")?;

    builder = builder
        .workers(args.workers.map(usize::from).unwrap_or(base.workers))
        .retry(base.retry)
        .local_ocr(base.local_ocr)
        .remote(base.remote)
        .local(base.local)
        .object_store(base.object_store)
        .page_separator(args.separator.clone().unwrap_or(base.page_separator))
        .remove_source_on_finish(base.remove_source_on_finish)
        .render_max_pixels(base.render_max_pixels);
    if let Some(dir) = base.pdfium_library_path {
        builder = builder.pdfium_library_path(dir);
    }
    if let Some(dir) = &args.output_dir {
        builder = builder.object_store_backend(ObjectStoreBackend::Fs { root: dir.clone() });
    }
    if args.preserve_layout {
        builder = builder.prompt(LAYOUT_EXTRACTION_PROMPT);
    }

    let progress = (!args.no_progress).then(CliProgressCallback::new);
    if let Some(cb) = &progress {
        builder = builder.progress_callback(cb.clone());
    }

    let config = builder.build().context("Invalid configuration")?;
    Ok((config, progress))
}

async fn run(args: RunArgs) -> Result<()> {
    let (config, progress) = build_config(&args)?;
    let store = FileTaskStore::open(&args.store_dir)
        .await
        .with_context(|| format!("Failed to open task store {:?}", args.store_dir))?;
    let service = OcrService::builder(config)
        .store(Arc::new(store))
        .start()
        .await
        .context("Failed to start service")?;

    // ── Submit ───────────────────────────────────────────────────────────
    let mut submitted = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let path = std::path::absolute(file)
            .with_context(|| format!("Failed to resolve {:?}", file))?;
        let id = service
            .submit(args.engine, path.to_string_lossy())
            .await
            .with_context(|| format!("Failed to submit {:?}", file))?;
        submitted.push((id, file.clone()));
    }

    // ── Wait (Ctrl-C cancels, a second Ctrl-C is ignored) ────────────────
    let poll = Duration::from_millis(200);
    let finished = {
        let waits = join_all(submitted.iter().map(|(id, _)| service.wait_terminal(*id, poll)));
        tokio::pin!(waits);
        tokio::select! {
            done = &mut waits => done,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} cancelling {} task(s)…", cyan("⊘"), submitted.len());
                for (id, _) in &submitted {
                    if let Err(e) = service.request_cancel(*id).await {
                        eprintln!("  {} {}: {}", red("✗"), short(*id), e);
                    }
                }
                waits.await
            }
        }
    };

    if let Some(cb) = &progress {
        cb.bar.finish_and_clear();
        let errors = cb.errors.load(Ordering::SeqCst);
        if errors > 0 {
            eprintln!("{} {} page(s) could not be recognised", red("⚠"), errors);
        }
    }

    // ── Report ───────────────────────────────────────────────────────────
    let mut failed = 0;
    for ((id, file), task) in submitted.iter().zip(finished) {
        let task = task.with_context(|| format!("Lost track of task {}", id))?;
        if task.status == TaskStatus::Failed {
            failed += 1;
        }
        let line = serde_json::json!({
            "task_id": id,
            "source": file.display().to_string(),
            "report": task.report(),
        });
        println!("{}", serde_json::to_string(&line).context("Failed to serialise status")?);
    }

    service.shutdown().await;
    if failed > 0 {
        anyhow::bail!("{} of {} task(s) failed", failed, submitted.len());
    }
    Ok(())
}

async fn status(id: Option<TaskId>, store_dir: PathBuf) -> Result<()> {
    let store = FileTaskStore::open(&store_dir)
        .await
        .with_context(|| format!("Failed to open task store {:?}", store_dir))?;

    match id {
        Some(id) => {
            let task = store
                .get(id)
                .await
                .with_context(|| format!("No task {}", id))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&task).context("Failed to serialise task")?
            );
        }
        None => {
            let tasks = store.list().await.context("Failed to list tasks")?;
            if tasks.is_empty() {
                eprintln!("{}", dim("no tasks"));
            }
            for task in tasks {
                println!(
                    "{}  {:<10}  {:<17}  {}/{} pages  {}",
                    task.id,
                    task.status,
                    task.engine_kind,
                    task.succeeded_pages().count(),
                    task.pages.len(),
                    task.source_ref
                );
            }
        }
    }
    Ok(())
}

async fn probe() -> Result<()> {
    let config = ServiceConfig::from_env().context("Invalid environment configuration")?;
    for kind in EngineKind::ALL {
        let engine = Engine::from_config(kind, &config)
            .with_context(|| format!("Failed to build engine {}", kind))?;
        let report = engine.probe().await;
        println!(
            "{} {:<17}  {}",
            if report.available { green("✓") } else { red("✗") },
            report.kind,
            report.detail
        );
    }
    Ok(())
}
