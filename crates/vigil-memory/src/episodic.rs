use std::path::{Path, PathBuf};

use chrono::Utc;
use vigil_core::Result;

use crate::store::{atomic_write, read_or_empty, AppendOutcome};
use crate::text::bullets_equivalent;

/// Append-only per-day log of time-stamped entries, one markdown file per
/// calendar day (`episodic/<YYYY-MM-DD>.md`).
pub struct EpisodicStore {
    dir: PathBuf,
}

impl EpisodicStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn today_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.md", Utc::now().format("%Y-%m-%d")))
    }

    /// Append a time-stamped entry to today's file unless a normalized
    /// match already exists in it.
    pub fn append(&self, entry: &str) -> Result<AppendOutcome> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Ok(AppendOutcome::Duplicate);
        }
        let path = self.today_path();
        let existing = read_or_empty(&path);
        let already = existing
            .lines()
            .filter_map(|l| l.strip_prefix("- "))
            .map(|l| l.splitn(2, "] ").nth(1).unwrap_or(l))
            .any(|line| bullets_equivalent(line, entry));
        if already {
            return Ok(AppendOutcome::Duplicate);
        }

        let mut content = existing;
        if content.is_empty() {
            content = format!("# {}\n\n", Utc::now().format("%Y-%m-%d"));
        }
        content.push_str(&format!("- [{}] {}\n", Utc::now().format("%H:%M:%S"), entry));
        atomic_write(&path, &content)?;
        Ok(AppendOutcome::Added)
    }

    /// The most recent episodic files, newest first: `(date-stem, content)`.
    pub fn recent(&self, n: usize) -> Vec<(String, String)> {
        let mut stems: Vec<String> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| {
                    let path = e.path();
                    if path.extension().is_some_and(|ext| ext == "md") {
                        path.file_stem().map(|s| s.to_string_lossy().to_string())
                    } else {
                        None
                    }
                })
                .collect(),
            Err(_) => return vec![],
        };
        // Date-stamped stems sort lexicographically = chronologically.
        stems.sort();
        stems
            .into_iter()
            .rev()
            .take(n)
            .map(|stem| {
                let content = read_or_empty(&self.dir.join(format!("{stem}.md")));
                (stem, content)
            })
            .collect()
    }
}
