//! # vigil-memory
//!
//! Layered durable memory for the Vigil agent: semantic and procedural
//! section-keyed markdown stores, an append-only episodic log, a persistent
//! goal book, deterministic per-turn extraction, and the compaction-time
//! flush that turns a long history into a carried-over session context.
//!
//! All files are human-readable markdown with stable level-2 headings, and
//! every write is an atomic temp-file + rename replace. Appends are
//! de-duplicated by a normalized-bullet equivalence check, so re-inserting
//! an equivalent fact is a no-op.

pub mod episodic;
pub mod extract;
pub mod goals;
pub mod manager;
pub mod store;
pub mod text;

pub use episodic::EpisodicStore;
pub use goals::{Goal, GoalBook, GoalStatus, ProgressEntry, ProgressSource};
pub use manager::{MemoryHealth, MemoryManager};
pub use store::{AppendOutcome, MarkdownStore};
