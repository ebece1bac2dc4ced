//! Diff engine.
//!
//! Compares two app snapshots and produces a structured, categorized patch,
//! or aligns two pieces of text line by line.
//!
//! ## Entry points
//!
//! ```ignore
//! use changegate_core::diff::{compute_diff, render_text_diff, TextFormat};
//!
//! let diff = compute_diff(&before, &after);
//! let html = render_text_diff(old_code, new_code, TextFormat::Html)?;
//! ```
//!
//! ## Guarantees
//!
//! - **Determinism**: identical inputs produce identical operation sequences.
//! - **Counts**: `total_changes == added + modified + deleted`.
//! - **Replay**: applying the operations to `before` reproduces `after`.

pub mod engine;
pub mod human_summary;
pub mod model;
pub mod patch;
pub mod text;

pub use engine::{compute_diff, impact_level_for, CRITICAL_KEYWORDS};
pub use human_summary::render_human_summary;
pub use model::{CategoryCounts, DiffResult, ImpactLevel, OpKind, Operation};
pub use patch::apply_operations;
pub use text::{diff_lines, render_text_diff, DiffLine, LineTag, TextFormat};
