use serde::{Deserialize, Serialize};
use std::path::Path;

use vigil_core::{Result, VigilError};

/// A skill parsed from a markdown file with YAML frontmatter.
///
/// The runtime does not execute skills; the body is injected into the
/// system prompt as instructions when the skill matches the user text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    /// Stable identifier (frontmatter `id`, falling back to the file stem).
    pub id: String,
    /// Skill name used in match scoring and the catalogue summary.
    pub name: String,
    /// Short description; its words contribute to the match score.
    pub description: String,
    /// Trigger phrases; each substring hit contributes to the match score.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Tie-break priority (higher wins).
    #[serde(default)]
    pub priority: i32,
    /// The full markdown body (instructions for the LLM).
    #[serde(skip)]
    pub body: String,
}

impl Skill {
    /// Parse a skill file. The format is:
    ///
    /// ```text
    /// ---
    /// name: trading-brief
    /// description: Summarize market conditions before trading
    /// triggers: [market brief, trading update]
    /// priority: 5
    /// ---
    ///
    /// # Instructions
    /// ...
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VigilError::Agent(format!("failed to read {}: {}", path.display(), e))
        })?;
        let fallback_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::parse(&content, &fallback_id)
    }

    /// Parse skill content with a fallback id (usually the file stem).
    pub fn parse(content: &str, fallback_id: &str) -> Result<Self> {
        let (frontmatter, body) = split_frontmatter(content)?;
        let mut skill = parse_frontmatter(&frontmatter)?;
        if skill.id.is_empty() {
            skill.id = fallback_id.to_string();
        }
        if skill.name.is_empty() {
            skill.name = skill.id.clone();
        }
        if skill.id.is_empty() {
            return Err(VigilError::Agent("skill has no id".into()));
        }
        if skill.description.is_empty() {
            return Err(VigilError::Agent(format!(
                "skill '{}' has no description",
                skill.id
            )));
        }
        skill.body = body;
        Ok(skill)
    }
}

/// Split a skill file into YAML frontmatter and markdown body.
fn split_frontmatter(content: &str) -> Result<(String, String)> {
    let trimmed = content.trim();
    if !trimmed.starts_with("---") {
        return Err(VigilError::Agent(
            "skill file must start with YAML frontmatter (---)".into(),
        ));
    }
    let after_first = &trimmed[3..];
    let end_pos = after_first.find("\n---").ok_or_else(|| {
        VigilError::Agent("skill file: missing closing --- for frontmatter".into())
    })?;
    let frontmatter = after_first[..end_pos].trim().to_string();
    let body = after_first[end_pos + 4..].trim().to_string();
    Ok((frontmatter, body))
}

/// Parse simple `key: value` frontmatter. Supports: id, name, description,
/// triggers, priority. Unknown keys are ignored.
fn parse_frontmatter(yaml: &str) -> Result<Skill> {
    let mut skill = Skill {
        id: String::new(),
        name: String::new(),
        description: String::new(),
        triggers: vec![],
        priority: 0,
        body: String::new(),
    };

    for line in yaml.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            match key {
                "id" => skill.id = unquote(value),
                "name" => skill.name = unquote(value),
                "description" => skill.description = unquote(value),
                "priority" => skill.priority = value.parse().unwrap_or(0),
                "triggers" => {
                    let inner = value.trim_start_matches('[').trim_end_matches(']');
                    skill.triggers = inner
                        .split(',')
                        .map(|t| unquote(t.trim()))
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                _ => {}
            }
        }
    }

    Ok(skill)
}

/// Remove surrounding quotes from a YAML value.
fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}
