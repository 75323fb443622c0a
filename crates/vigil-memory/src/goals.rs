use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use vigil_core::Result;

use crate::store::{atomic_write, read_or_empty};
use crate::text::{bullets_equivalent, titles_equivalent};

/// Maximum tags kept per goal.
pub const MAX_TAGS: usize = 12;
/// Maximum progress entries kept per goal; oldest are dropped on overflow.
pub const MAX_PROGRESS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Active => "active",
            GoalStatus::Completed => "completed",
            GoalStatus::Paused => "paused",
            GoalStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "active" => Some(GoalStatus::Active),
            "completed" => Some(GoalStatus::Completed),
            "paused" => Some(GoalStatus::Paused),
            "cancelled" => Some(GoalStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSource {
    User,
    Assistant,
    System,
}

impl ProgressSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressSource::User => "user",
            ProgressSource::Assistant => "assistant",
            ProgressSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "user" => Some(ProgressSource::User),
            "assistant" => Some(ProgressSource::Assistant),
            "system" => Some(ProgressSource::System),
            _ => None,
        }
    }
}

/// One progress note on a goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub at: DateTime<Utc>,
    pub source: ProgressSource,
    pub note: String,
}

/// A persistent mission record with a lifecycle status and a bounded
/// progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub title: String,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub progress: Vec<ProgressEntry>,
}

impl Goal {
    fn new(title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.trim().to_string(),
            status: GoalStatus::Active,
            created_at: now,
            updated_at: now,
            tags: vec![],
            progress: vec![],
        }
    }
}

/// The goal book: all goals, persisted as a markdown document parseable by
/// the inverse serializer. Every mutation saves atomically.
pub struct GoalBook {
    path: PathBuf,
    goals: Vec<Goal>,
}

impl GoalBook {
    /// Open the book, parsing the file if present. A corrupt file is
    /// treated as empty (readers tolerate partial state).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let goals = parse_goals(&read_or_empty(&path));
        Self { path, goals }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn get(&self, id: Uuid) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    /// Find a goal whose title is equivalent to `title` (§ identity rules:
    /// normalized equality, containment, or Jaccard ≥ 0.72).
    pub fn find_equivalent(&self, title: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| titles_equivalent(&g.title, title))
    }

    /// Upsert a goal by title. Reuses an equivalent existing goal
    /// (reaffirmation re-activates it and bumps `updated_at`); otherwise
    /// creates one. Returns `(goal_id, created)`.
    pub fn upsert(
        &mut self,
        title: &str,
        source: ProgressSource,
        note: Option<&str>,
        tags: &[String],
    ) -> Result<(Uuid, bool)> {
        let existing = self
            .goals
            .iter()
            .position(|g| titles_equivalent(&g.title, title));
        let (idx, created) = match existing {
            Some(idx) => {
                let goal = &mut self.goals[idx];
                goal.status = GoalStatus::Active;
                goal.updated_at = Utc::now();
                (idx, false)
            }
            None => {
                debug!(title, "creating goal");
                self.goals.push(Goal::new(title));
                (self.goals.len() - 1, true)
            }
        };

        for tag in tags {
            let goal = &mut self.goals[idx];
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !goal.tags.contains(&tag) && goal.tags.len() < MAX_TAGS {
                goal.tags.push(tag);
            }
        }

        if let Some(note) = note {
            self.push_progress(idx, source, note);
        }

        let id = self.goals[idx].id;
        self.save()?;
        Ok((id, created))
    }

    /// Append a progress note unless an equivalent note already exists on
    /// the goal. Returns whether a note was added.
    pub fn append_progress(
        &mut self,
        id: Uuid,
        source: ProgressSource,
        note: &str,
    ) -> Result<bool> {
        let Some(idx) = self.goals.iter().position(|g| g.id == id) else {
            return Ok(false);
        };
        let added = self.push_progress(idx, source, note);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    fn push_progress(&mut self, idx: usize, source: ProgressSource, note: &str) -> bool {
        // Pipes would collide with summary-line separators downstream.
        let note = note.trim().replace('|', "/");
        if note.is_empty() {
            return false;
        }
        let goal = &mut self.goals[idx];
        if goal.progress.iter().any(|p| bullets_equivalent(&p.note, &note)) {
            return false;
        }
        goal.progress.push(ProgressEntry {
            at: Utc::now(),
            source,
            note,
        });
        while goal.progress.len() > MAX_PROGRESS {
            goal.progress.remove(0);
        }
        goal.updated_at = Utc::now();
        true
    }

    /// Update a goal's lifecycle status.
    pub fn set_status(&mut self, id: Uuid, status: GoalStatus) -> Result<bool> {
        let Some(goal) = self.goals.iter_mut().find(|g| g.id == id) else {
            return Ok(false);
        };
        if goal.status != status {
            goal.status = status;
            goal.updated_at = Utc::now();
            self.save()?;
        }
        Ok(true)
    }

    pub fn active(&self) -> impl Iterator<Item = &Goal> {
        self.goals.iter().filter(|g| g.status == GoalStatus::Active)
    }

    /// Live goal counts by status, for health metrics.
    pub fn counts_by_status(&self) -> [(GoalStatus, usize); 4] {
        let count = |s: GoalStatus| self.goals.iter().filter(|g| g.status == s).count();
        [
            (GoalStatus::Active, count(GoalStatus::Active)),
            (GoalStatus::Completed, count(GoalStatus::Completed)),
            (GoalStatus::Paused, count(GoalStatus::Paused)),
            (GoalStatus::Cancelled, count(GoalStatus::Cancelled)),
        ]
    }

    /// Compact rendering for the bootstrap context.
    pub fn render_compact(&self) -> String {
        let mut goals: Vec<&Goal> = self.goals.iter().collect();
        goals.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let mut out = String::new();
        for goal in goals {
            out.push_str(&format!("- [{}] {}", goal.status.as_str(), goal.title));
            if let Some(last) = goal.progress.last() {
                out.push_str(&format!(" (last: {})", last.note));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    fn save(&self) -> Result<()> {
        atomic_write(&self.path, &serialize_goals(&self.goals))
    }
}

/// Serialize the goal book to markdown, newest-updated first.
pub fn serialize_goals(goals: &[Goal]) -> String {
    let mut ordered: Vec<&Goal> = goals.iter().collect();
    ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut out = String::from("# Goals\n\n");
    for goal in ordered {
        out.push_str(&format!("## {}\n\n", goal.title));
        out.push_str(&format!("- id: {}\n", goal.id));
        out.push_str(&format!("- status: {}\n", goal.status.as_str()));
        out.push_str(&format!("- created: {}\n", goal.created_at.to_rfc3339()));
        out.push_str(&format!("- updated: {}\n", goal.updated_at.to_rfc3339()));
        if !goal.tags.is_empty() {
            out.push_str(&format!("- tags: {}\n", goal.tags.join(", ")));
        }
        if !goal.progress.is_empty() {
            out.push_str("\n### Progress\n\n");
            for p in &goal.progress {
                out.push_str(&format!(
                    "- [{}] ({}) {}\n",
                    p.at.to_rfc3339(),
                    p.source.as_str(),
                    p.note
                ));
            }
        }
        out.push('\n');
    }
    out
}

/// Parse the inverse of [`serialize_goals`]. Unparseable chunks are
/// dropped rather than failing the whole document.
pub fn parse_goals(raw: &str) -> Vec<Goal> {
    let mut goals: Vec<Goal> = Vec::new();
    let mut in_progress = false;

    for line in raw.lines() {
        let line = line.trim_end();
        if let Some(title) = line.strip_prefix("## ") {
            goals.push(Goal::new(title));
            in_progress = false;
            continue;
        }
        if line.trim() == "### Progress" {
            in_progress = true;
            continue;
        }
        let Some(goal) = goals.last_mut() else { continue };
        let Some(bullet) = line.strip_prefix("- ") else { continue };

        if in_progress {
            if let Some(entry) = parse_progress_line(bullet) {
                goal.progress.push(entry);
            }
            continue;
        }
        if let Some((key, value)) = bullet.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "id" => {
                    if let Ok(id) = value.parse::<Uuid>() {
                        goal.id = id;
                    }
                }
                "status" => {
                    if let Some(status) = GoalStatus::parse(value) {
                        goal.status = status;
                    }
                }
                "created" => {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
                        goal.created_at = ts.with_timezone(&Utc);
                    }
                }
                "updated" => {
                    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
                        goal.updated_at = ts.with_timezone(&Utc);
                    }
                }
                "tags" => {
                    goal.tags = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .take(MAX_TAGS)
                        .collect();
                }
                _ => {}
            }
        }
    }

    goals
}

/// Parse `[iso] (source) note`.
fn parse_progress_line(bullet: &str) -> Option<ProgressEntry> {
    let rest = bullet.strip_prefix('[')?;
    let (ts, rest) = rest.split_once("] ")?;
    let rest = rest.strip_prefix('(')?;
    let (source, note) = rest.split_once(") ")?;
    Some(ProgressEntry {
        at: DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc),
        source: ProgressSource::parse(source)?,
        note: note.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(dir: &tempfile::TempDir) -> GoalBook {
        GoalBook::open(dir.path().join("goals.md"))
    }

    #[test]
    fn upsert_creates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        let (id1, created1) = goals
            .upsert(
                "ship the dashboard by Friday",
                ProgressSource::User,
                Some("We need to ship the dashboard by Friday"),
                &[],
            )
            .unwrap();
        assert!(created1);

        let (id2, created2) = goals
            .upsert("ship dashboard by Friday", ProgressSource::User, Some("Priority: ship dashboard"), &[])
            .unwrap();
        assert!(!created2);
        assert_eq!(id1, id2);
        assert_eq!(goals.goals().len(), 1);
        assert_eq!(goals.goals()[0].progress.len(), 2);
    }

    #[test]
    fn duplicate_progress_note_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        let (id, _) = goals
            .upsert("water the plants", ProgressSource::User, Some("start watering"), &[])
            .unwrap();
        assert!(!goals
            .append_progress(id, ProgressSource::Assistant, "Start watering!")
            .unwrap());
        assert_eq!(goals.get(id).unwrap().progress.len(), 1);
    }

    #[test]
    fn progress_overflow_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        let (id, _) = goals
            .upsert("long mission", ProgressSource::User, None, &[])
            .unwrap();
        for i in 0..30 {
            goals
                .append_progress(id, ProgressSource::Assistant, &format!("step number {i} complete"))
                .unwrap();
        }
        let goal = goals.get(id).unwrap();
        assert_eq!(goal.progress.len(), MAX_PROGRESS);
        assert!(goal.progress[0].note.contains("step number 6"));
    }

    #[test]
    fn pipes_in_notes_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        let (id, _) = goals
            .upsert("mission", ProgressSource::User, Some("Task: x | Outcome: y"), &[])
            .unwrap();
        assert_eq!(goals.get(id).unwrap().progress[0].note, "Task: x / Outcome: y");
    }

    #[test]
    fn tags_cap_at_twelve() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        let tags: Vec<String> = (0..20).map(|i| format!("tag{i}")).collect();
        let (id, _) = goals
            .upsert("tagged goal", ProgressSource::User, None, &tags)
            .unwrap();
        assert_eq!(goals.get(id).unwrap().tags.len(), MAX_TAGS);
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut goals = book(&dir);
        goals
            .upsert(
                "ship the dashboard",
                ProgressSource::User,
                Some("kickoff"),
                &["launch".into()],
            )
            .unwrap();
        goals
            .upsert("water the plants", ProgressSource::User, Some("daily chore"), &[])
            .unwrap();
        let (id, _) = goals
            .upsert("retire old node", ProgressSource::User, None, &[])
            .unwrap();
        goals.set_status(id, GoalStatus::Paused).unwrap();

        let serialized = serialize_goals(goals.goals());
        let parsed = parse_goals(&serialized);

        let mut original: Vec<Goal> = goals.goals().to_vec();
        original.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        assert_eq!(parsed, original);
    }

    #[test]
    fn reload_from_disk_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goals.md");
        {
            let mut goals = GoalBook::open(&path);
            goals
                .upsert("persist me", ProgressSource::User, Some("first note"), &[])
                .unwrap();
        }
        let reloaded = GoalBook::open(&path);
        assert_eq!(reloaded.goals().len(), 1);
        assert_eq!(reloaded.goals()[0].title, "persist me");
        assert_eq!(reloaded.goals()[0].progress.len(), 1);
        assert_eq!(reloaded.goals()[0].status, GoalStatus::Active);
    }

    #[test]
    fn corrupt_file_parses_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goals.md");
        std::fs::write(&path, "not a goals file at all").unwrap();
        let goals = GoalBook::open(&path);
        assert!(goals.goals().is_empty());
    }
}
