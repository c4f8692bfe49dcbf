//! Pipeline stages for document text recognition.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and a stage can be swapped (a different splitter, a
//! scripted recognizer) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ split ──▶ encode ──▶ engine ──▶ postprocess ──▶ recognize (aggregate)
//! (bytes)    (pdfium)  (base64)   (adapter)  (cleanup)       (publish + status)
//! ```
//!
//! 1. [`split`]: sniff the format and rasterise PDF pages; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]: PNG-encode and base64-wrap a unit for multimodal requests
//! 3. [`postprocess`]: deterministic cleanup of engine output
//! 4. [`recognize`]: the per-task driver (claim, per-page retry, cancel
//!    checks, aggregation and publishing)

pub mod encode;
pub mod postprocess;
pub mod recognize;
pub mod split;
