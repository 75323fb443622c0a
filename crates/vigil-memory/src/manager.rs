use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use vigil_core::{Message, Role, VigilError};
use vigil_llm::{LlmProvider, LlmRequest};
use vigil_resilience::ResilientExecutor;

use crate::episodic::EpisodicStore;
use crate::extract::{
    detect_status_words, extract_goal_candidates, extract_preferences, extract_rules,
};
use crate::goals::{GoalBook, GoalStatus, ProgressSource};
use crate::store::{atomic_write, read_or_empty, AppendOutcome, MarkdownStore};
use crate::text::{first_sentence, jaccard, TURN_RELEVANCE_JACCARD};

const SEMANTIC_SECTIONS: &[&str] = &["User Preferences", "Known Facts", "Workflow Notes"];
const PROCEDURAL_SECTIONS: &[&str] = &["Operating Rules", "Learned Behaviors"];

/// How many trailing user/assistant pairs the compaction flush re-mines.
const FLUSH_MAX_PAIRS: usize = 40;

const SESSION_SUMMARY_PROMPT: &str = "Summarize this session for your own future reference. \
Respond with three short sections titled exactly: Current Goal, Important Facts About User, \
Progress and Next Steps. Be factual and specific; no preamble.";

/// Memory health counters. `goals_by_status` is computed live at snapshot
/// time; the rest are monotonic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryHealth {
    pub writes: BTreeMap<String, u64>,
    pub duplicate_skips: u64,
    pub errors: u64,
    pub last_write_at: Option<DateTime<Utc>>,
    pub goals_by_status: BTreeMap<String, usize>,
}

#[derive(Default)]
struct HealthInner {
    writes: BTreeMap<String, u64>,
    duplicate_skips: u64,
    errors: u64,
    last_write_at: Option<DateTime<Utc>>,
}

/// Optional LLM-backed session summarizer, with its own executor instance.
struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    executor: Arc<ResilientExecutor>,
}

/// The layered memory manager: semantic + procedural markdown stores, the
/// episodic log, the goal book, and the session-context carry-over.
///
/// Writers are serialized per file; readers may observe an earlier snapshot
/// (reads feed prompts, not safety-critical logic). Extraction failures are
/// swallowed and counted.
pub struct MemoryManager {
    root: PathBuf,
    semantic: Mutex<MarkdownStore>,
    procedural: Mutex<MarkdownStore>,
    episodic: EpisodicStore,
    goals: Mutex<GoalBook>,
    health: Mutex<HealthInner>,
    turn_counter: AtomicU32,
    extract_every_n_turns: u32,
    max_recent_episodes: usize,
    summarizer: Option<Summarizer>,
}

impl MemoryManager {
    pub fn new(root: impl Into<PathBuf>, extract_every_n_turns: u32, max_recent_episodes: usize) -> Self {
        let root = root.into();
        Self {
            semantic: Mutex::new(MarkdownStore::open(
                root.join("semantic/memory.md"),
                SEMANTIC_SECTIONS,
            )),
            procedural: Mutex::new(MarkdownStore::open(
                root.join("procedural/rules.md"),
                PROCEDURAL_SECTIONS,
            )),
            episodic: EpisodicStore::new(root.join("episodic")),
            goals: Mutex::new(GoalBook::open(root.join("goals/goals.md"))),
            health: Mutex::new(HealthInner::default()),
            turn_counter: AtomicU32::new(0),
            extract_every_n_turns: extract_every_n_turns.max(1),
            max_recent_episodes,
            summarizer: None,
            root,
        }
    }

    /// Attach an LLM-backed session summarizer (used by the compaction
    /// flush; without one the deterministic fallback is always used).
    pub fn with_summarizer(
        mut self,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        executor: Arc<ResilientExecutor>,
    ) -> Self {
        self.summarizer = Some(Summarizer {
            provider,
            model: model.into(),
            executor,
        });
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_context_path(&self) -> PathBuf {
        self.root.join("semantic/session_context.md")
    }

    // ── Health bookkeeping ─────────────────────────────────────

    fn note_outcome(&self, store: &str, outcome: AppendOutcome) {
        let mut health = self.health.lock();
        match outcome {
            AppendOutcome::Added => {
                *health.writes.entry(store.to_string()).or_default() += 1;
                health.last_write_at = Some(Utc::now());
            }
            AppendOutcome::Duplicate => health.duplicate_skips += 1,
        }
    }

    fn note_error(&self, store: &str, err: &VigilError) {
        warn!(store, error = %err, "memory write failed");
        self.health.lock().errors += 1;
    }

    /// Counts of writes, duplicate skips, errors, and live goals by status.
    pub fn health(&self) -> MemoryHealth {
        let inner = self.health.lock();
        let mut snapshot = MemoryHealth {
            writes: inner.writes.clone(),
            duplicate_skips: inner.duplicate_skips,
            errors: inner.errors,
            last_write_at: inner.last_write_at,
            goals_by_status: BTreeMap::new(),
        };
        drop(inner);
        for (status, count) in self.goals.lock().counts_by_status() {
            snapshot.goals_by_status.insert(status.as_str().to_string(), count);
        }
        snapshot
    }

    // ── Bootstrap context ──────────────────────────────────────

    /// Assemble the memory block injected at the top of each agent turn.
    /// Only non-empty sections appear.
    pub fn bootstrap_context(&self) -> String {
        let mut blocks: Vec<String> = Vec::new();

        let semantic = self.semantic.lock().render_non_empty();
        if !semantic.is_empty() {
            blocks.push(format!("=== SEMANTIC MEMORY (durable facts) ===\n{semantic}"));
        }

        let procedural = self.procedural.lock().render_non_empty();
        if !procedural.is_empty() {
            blocks.push(format!("=== PROCEDURAL MEMORY (operating rules) ===\n{procedural}"));
        }

        let goals = self.goals.lock().render_compact();
        if !goals.is_empty() {
            blocks.push(format!("=== PERSISTENT GOALS ===\n{goals}"));
        }

        for (date, content) in self.episodic.recent(self.max_recent_episodes) {
            let content = content.trim();
            if !content.is_empty() {
                blocks.push(format!("=== EPISODIC MEMORY {date} ===\n{content}"));
            }
        }

        let session = read_or_empty(&self.session_context_path());
        let session = session.trim();
        if !session.is_empty() {
            blocks.push(format!("=== ACTIVE SESSION CONTEXT ===\n{session}"));
        }

        blocks.join("\n\n")
    }

    // ── Per-turn extraction ────────────────────────────────────

    /// Deterministic extraction over one `(user, assistant)` pair, plus the
    /// periodic episodic summary every N turns. Never fails: errors are
    /// swallowed and counted.
    pub fn record_turn(&self, user_text: &str, assistant_reply: &str) {
        self.apply_extraction(user_text, assistant_reply);

        let turn = self.turn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        if turn % self.extract_every_n_turns == 0 {
            let line = format!(
                "Task: {} | Approach: {} | Outcome: completed",
                first_sentence(user_text, 80),
                first_sentence(assistant_reply, 80),
            );
            match self.episodic.append(&line) {
                Ok(outcome) => self.note_outcome("episodic", outcome),
                Err(e) => self.note_error("episodic", &e),
            }
        }
    }

    fn apply_extraction(&self, user_text: &str, assistant_reply: &str) {
        // 1. Goal upsert from user-message patterns. Goals touched here
        // already carry a user-sourced note for this turn, so step 2 skips
        // them.
        let note = first_sentence(user_text, 180);
        let mut upserted: Vec<uuid::Uuid> = Vec::new();
        for candidate in extract_goal_candidates(user_text) {
            let result = self.goals.lock().upsert(
                &candidate,
                ProgressSource::User,
                Some(&note),
                &[],
            );
            match result {
                Ok((id, created)) => {
                    upserted.push(id);
                    self.note_outcome(
                        "goals",
                        if created { AppendOutcome::Added } else { AppendOutcome::Duplicate },
                    );
                }
                Err(e) => self.note_error("goals", &e),
            }
        }

        // 2. Progress + lifecycle on goals the turn touches.
        let turn_text = format!("{user_text}\n{assistant_reply}");
        let touched: Vec<(uuid::Uuid, String)> = self
            .goals
            .lock()
            .active()
            .filter(|g| !upserted.contains(&g.id))
            .filter(|g| jaccard(&g.title, &turn_text) >= TURN_RELEVANCE_JACCARD)
            .map(|g| (g.id, g.title.clone()))
            .collect();
        let progress_note = first_sentence(assistant_reply, 180);
        for (id, title) in touched {
            if !progress_note.is_empty() {
                match self
                    .goals
                    .lock()
                    .append_progress(id, ProgressSource::Assistant, &progress_note)
                {
                    Ok(true) => self.note_outcome("goals", AppendOutcome::Added),
                    Ok(false) => self.note_outcome("goals", AppendOutcome::Duplicate),
                    Err(e) => self.note_error("goals", &e),
                }
            }
            if let Some(status) = detect_status_words(&turn_text) {
                debug!(goal = %title, status = status.as_str(), "goal lifecycle word detected");
                if let Err(e) = self.goals.lock().set_status(id, status) {
                    self.note_error("goals", &e);
                }
            }
        }

        // 3. Preference mining into semantic "User Preferences".
        for pref in extract_preferences(user_text) {
            match self.semantic.lock().append_unique("User Preferences", &pref) {
                Ok(outcome) => self.note_outcome("semantic", outcome),
                Err(e) => self.note_error("semantic", &e),
            }
        }

        // 4. Rule mining into procedural "Learned Behaviors".
        for rule in extract_rules(user_text) {
            match self.procedural.lock().append_unique("Learned Behaviors", &rule) {
                Ok(outcome) => self.note_outcome("procedural", outcome),
                Err(e) => self.note_error("procedural", &e),
            }
        }
    }

    /// Append a line to today's episodic log (turn epilogue).
    pub fn log_episode(&self, entry: &str) {
        match self.episodic.append(entry) {
            Ok(outcome) => self.note_outcome("episodic", outcome),
            Err(e) => self.note_error("episodic", &e),
        }
    }

    // ── Compaction flush ───────────────────────────────────────

    /// Pre-compaction flush: re-mine the last ≤40 user/assistant pairs,
    /// then replace `session_context.md` with a fresh session summary
    /// (LLM-generated when a summarizer is attached and reachable,
    /// deterministic otherwise).
    pub async fn flush_before_compaction(&self, history: &[Message]) {
        let pairs = trailing_pairs(history, FLUSH_MAX_PAIRS);
        for (user, assistant) in &pairs {
            self.apply_extraction(user, assistant);
        }

        let summary = match self.llm_summary(&pairs).await {
            Some(s) => s,
            None => self.deterministic_summary(&pairs),
        };

        match atomic_write(&self.session_context_path(), &summary) {
            Ok(()) => self.note_outcome("session_context", AppendOutcome::Added),
            Err(e) => self.note_error("session_context", &e),
        }
    }

    async fn llm_summary(&self, pairs: &[(String, String)]) -> Option<String> {
        let summarizer = self.summarizer.as_ref()?;
        if pairs.is_empty() {
            return None;
        }

        let mut transcript = String::new();
        for (user, assistant) in pairs {
            transcript.push_str(&format!("User: {user}\nAssistant: {assistant}\n"));
        }
        let request = LlmRequest {
            model: summarizer.model.clone(),
            messages: vec![
                Message::text(Role::System, SESSION_SUMMARY_PROMPT),
                Message::text(Role::User, transcript),
            ],
            tools: vec![],
            temperature: 0.3,
            max_tokens: 800,
        };

        let provider = Arc::clone(&summarizer.provider);
        match summarizer
            .executor
            .execute("memory:session_summary", || {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                async move { provider.complete(&request).await }
            })
            .await
        {
            Ok(response) if !response.content.trim().is_empty() => Some(response.content),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "session summary call failed, using deterministic fallback");
                None
            }
        }
    }

    fn deterministic_summary(&self, pairs: &[(String, String)]) -> String {
        let current_goal = self
            .goals
            .lock()
            .active()
            .next()
            .map(|g| g.title.clone())
            .unwrap_or_else(|| "none recorded".into());
        let facts = self.semantic.lock().section("User Preferences").join("; ");
        let last_step = pairs
            .last()
            .map(|(_, assistant)| first_sentence(assistant, 180))
            .unwrap_or_default();

        format!(
            "Current Goal: {current_goal}\n\
             Important Facts About User: {}\n\
             Progress and Next Steps: {last_step}\n",
            if facts.is_empty() { "none recorded" } else { facts.as_str() },
        )
    }

    // ── Tool-callable operations ───────────────────────────────

    /// `write_memory_entry` tool: append a bullet to the semantic or
    /// procedural store. Returns a status string.
    pub fn write_memory_entry(&self, store: &str, content: &str, section: Option<&str>) -> String {
        let (target, default_section) = match store {
            "semantic" => (&self.semantic, "Known Facts"),
            "procedural" => (&self.procedural, "Learned Behaviors"),
            other => return format!("Error: unknown store '{other}' (use semantic or procedural)"),
        };
        let section = section.unwrap_or(default_section).to_string();
        match target.lock().append_unique(&section, content) {
            Ok(AppendOutcome::Added) => {
                self.note_outcome(store, AppendOutcome::Added);
                format!("Saved to {store} memory ({section})")
            }
            Ok(AppendOutcome::Duplicate) => {
                self.note_outcome(store, AppendOutcome::Duplicate);
                "Already recorded".into()
            }
            Err(e) => {
                self.note_error(store, &e);
                format!("Error: {e}")
            }
        }
    }

    /// `write_goal_entry` tool: upsert a goal with optional progress note,
    /// status, and tags. Returns a status string.
    pub fn write_goal_entry(
        &self,
        title: &str,
        progress: Option<&str>,
        status: Option<&str>,
        tags: Vec<String>,
    ) -> String {
        if title.trim().is_empty() {
            return "Error: goal title is empty".into();
        }
        let result =
            self.goals
                .lock()
                .upsert(title, ProgressSource::Assistant, progress, &tags);
        let (id, created) = match result {
            Ok(pair) => pair,
            Err(e) => {
                self.note_error("goals", &e);
                return format!("Error: {e}");
            }
        };
        self.note_outcome(
            "goals",
            if created { AppendOutcome::Added } else { AppendOutcome::Duplicate },
        );

        if let Some(status) = status {
            match GoalStatus::parse(status) {
                Some(parsed) => {
                    if let Err(e) = self.goals.lock().set_status(id, parsed) {
                        self.note_error("goals", &e);
                    }
                }
                None => return format!("Error: unknown goal status '{status}'"),
            }
        }

        if created {
            format!("Created goal: {}", title.trim())
        } else {
            format!("Updated goal: {}", title.trim())
        }
    }

    /// `remember_this` tool: durable fact + user-sourced goal upsert +
    /// episodic note. Idempotent: repeating the same text reports
    /// "already remembered" and leaves the file untouched.
    pub fn remember_this(&self, text: &str) -> String {
        let text = text.trim();
        if text.is_empty() {
            return "Error: nothing to remember".into();
        }
        let outcome = match self.semantic.lock().append_unique("Known Facts", text) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.note_error("semantic", &e);
                return format!("Error: {e}");
            }
        };
        self.note_outcome("semantic", outcome);

        if outcome == AppendOutcome::Duplicate {
            return "Already remembered".into();
        }

        for candidate in extract_goal_candidates(text) {
            let _ = self
                .goals
                .lock()
                .upsert(&candidate, ProgressSource::User, Some(text), &[]);
        }
        self.log_episode(&format!("Noted: {text}"));
        "Remembered".into()
    }
}

/// The trailing user/assistant pairs of a history, oldest first.
fn trailing_pairs(history: &[Message], max_pairs: usize) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut pending_user: Option<String> = None;
    for msg in history {
        match msg.role {
            Role::User => pending_user = Some(msg.text_content()),
            Role::Assistant => {
                let text = msg.text_content();
                if text.is_empty() {
                    continue;
                }
                if let Some(user) = pending_user.take() {
                    pairs.push((user, text));
                }
            }
            _ => {}
        }
    }
    if pairs.len() > max_pairs {
        pairs.drain(..pairs.len() - max_pairs);
    }
    pairs
}
