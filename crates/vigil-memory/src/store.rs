use std::path::{Path, PathBuf};

use tracing::debug;
use vigil_core::Result;

use crate::text::bullets_equivalent;

/// Result of an append-unique operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Added,
    Duplicate,
}

/// Atomically replace `path` with `content`: write a temp file adjacent,
/// then rename. Readers either see the old file or the new one.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a file, tolerating absence (empty string); partial or missing
/// state never fails a read path.
pub fn read_or_empty(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// A section-keyed bulleted markdown file, e.g.:
///
/// ```text
/// ## User Preferences
///
/// - Prefers concise replies
///
/// ## Known Facts
///
/// - Operator timezone is CET
/// ```
///
/// Sections are level-2 headings in a fixed order; entries are `- ` bullets.
/// Appends are de-duplicated against every section of the file.
pub struct MarkdownStore {
    path: PathBuf,
    sections: Vec<(String, Vec<String>)>,
}

impl MarkdownStore {
    /// Open a store, parsing the file if it exists. `section_names` fixes
    /// the section order; unknown headings found on disk are kept after the
    /// known ones so hand edits survive.
    pub fn open(path: impl Into<PathBuf>, section_names: &[&str]) -> Self {
        let path = path.into();
        let mut sections: Vec<(String, Vec<String>)> = section_names
            .iter()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();

        let raw = read_or_empty(&path);
        let mut current: Option<usize> = None;
        for line in raw.lines() {
            let line = line.trim_end();
            if let Some(heading) = line.strip_prefix("## ") {
                let heading = heading.trim();
                current = match sections.iter().position(|(name, _)| name == heading) {
                    Some(idx) => Some(idx),
                    None => {
                        sections.push((heading.to_string(), Vec::new()));
                        Some(sections.len() - 1)
                    }
                };
            } else if let Some(bullet) = line.strip_prefix("- ") {
                if let Some(idx) = current {
                    sections[idx].1.push(bullet.trim().to_string());
                }
            }
        }

        Self { path, sections }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All bullets in one section.
    pub fn section(&self, name: &str) -> &[String] {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bullets)| bullets.as_slice())
            .unwrap_or(&[])
    }

    /// Total bullet count across sections.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any section already holds a bullet equivalent to `entry`.
    pub fn contains_equivalent(&self, entry: &str) -> bool {
        self.sections
            .iter()
            .flat_map(|(_, bullets)| bullets.iter())
            .any(|b| bullets_equivalent(b, entry))
    }

    /// Append `entry` to `section` unless an equivalent bullet already
    /// exists anywhere in this file. Persists on success.
    pub fn append_unique(&mut self, section: &str, entry: &str) -> Result<AppendOutcome> {
        let entry = entry.trim();
        if entry.is_empty() || self.contains_equivalent(entry) {
            debug!(path = ?self.path, section, "duplicate bullet skipped");
            return Ok(AppendOutcome::Duplicate);
        }
        match self.sections.iter_mut().find(|(n, _)| n == section) {
            Some((_, bullets)) => bullets.push(entry.to_string()),
            None => self
                .sections
                .push((section.to_string(), vec![entry.to_string()])),
        }
        self.save()?;
        Ok(AppendOutcome::Added)
    }

    /// Render the whole document. Empty sections keep their headings so the
    /// file's shape is stable.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, bullets) in &self.sections {
            out.push_str(&format!("## {name}\n\n"));
            for bullet in bullets {
                out.push_str(&format!("- {bullet}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// Render only non-empty sections, for prompt injection.
    pub fn render_non_empty(&self) -> String {
        let mut out = String::new();
        for (name, bullets) in &self.sections {
            if bullets.is_empty() {
                continue;
            }
            out.push_str(&format!("## {name}\n"));
            for bullet in bullets {
                out.push_str(&format!("- {bullet}\n"));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    fn save(&self) -> Result<()> {
        atomic_write(&self.path, &self.render())
    }
}
