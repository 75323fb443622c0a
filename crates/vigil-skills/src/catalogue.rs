use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::definition::Skill;

/// Minimum score for a skill to be selected.
const MATCH_THRESHOLD: i32 = 10;

/// A scored skill selection.
#[derive(Debug, Clone)]
pub struct SkillMatch<'a> {
    pub skill: &'a Skill,
    pub score: i32,
}

/// The skill catalogue, immutable after startup discovery.
pub struct SkillCatalogue {
    skills: HashMap<String, Skill>,
}

impl SkillCatalogue {
    pub fn empty() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Discover `*.md` skill files in a directory. Malformed files are
    /// skipped with a warning; a missing directory yields an empty
    /// catalogue.
    pub fn discover(dir: &Path) -> Self {
        let mut skills = HashMap::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(?dir, "skills directory does not exist, starting empty");
                return Self { skills };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "md") {
                continue;
            }
            match Skill::from_file(&path) {
                Ok(skill) => {
                    info!(skill = %skill.id, path = ?path, "loaded skill");
                    skills.insert(skill.id.clone(), skill);
                }
                Err(e) => warn!(path = ?path, error = %e, "failed to load skill"),
            }
        }

        Self { skills }
    }

    /// Register a skill programmatically (tests, embedded defaults).
    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.id.clone(), skill);
    }

    pub fn get(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Score one skill against a user text:
    /// +20 if the normalized skill name is a substring,
    /// +10 per trigger phrase substring hit,
    /// +1 per description word (length ≥ 3) present in the text.
    pub fn score(skill: &Skill, user_text: &str) -> i32 {
        let text = normalize(user_text);
        let mut score = 0;

        if !skill.name.is_empty() && text.contains(&normalize(&skill.name)) {
            score += 20;
        }
        for trigger in &skill.triggers {
            let t = normalize(trigger);
            if !t.is_empty() && text.contains(&t) {
                score += 10;
            }
        }
        for word in normalize(&skill.description).split_whitespace() {
            if word.len() >= 3 && text.contains(word) {
                score += 1;
            }
        }
        score
    }

    /// Select the best-matching skill for a user text: highest score ≥ 10,
    /// ties broken by higher priority, then lexicographic id.
    pub fn match_skill(&self, user_text: &str) -> Option<SkillMatch<'_>> {
        let mut best: Option<SkillMatch<'_>> = None;
        for skill in self.skills.values() {
            let score = Self::score(skill, user_text);
            if score < MATCH_THRESHOLD {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => {
                    score > b.score
                        || (score == b.score
                            && (skill.priority > b.skill.priority
                                || (skill.priority == b.skill.priority
                                    && skill.id < b.skill.id)))
                }
            };
            if better {
                best = Some(SkillMatch { skill, score });
            }
        }
        best
    }

    /// Compact summary of every skill, for the system prompt.
    pub fn catalogue_block(&self) -> Option<String> {
        if self.skills.is_empty() {
            return None;
        }
        let mut ids: Vec<&String> = self.skills.keys().collect();
        ids.sort();
        let mut block = String::from("Available skills:\n");
        for id in ids {
            let skill = &self.skills[id];
            block.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
        Some(block)
    }
}

/// Lowercase and strip everything except alphanumerics and spaces.
fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() {
            out.push(' ');
        } else {
            out.push(' ');
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(id: &str, name: &str, desc: &str, triggers: &[&str], priority: i32) -> Skill {
        Skill {
            id: id.into(),
            name: name.into(),
            description: desc.into(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            priority,
            body: format!("Body of {id}."),
        }
    }

    #[test]
    fn name_substring_scores_twenty() {
        let s = skill("brief", "market brief", "irrelevant words", &[], 0);
        assert!(SkillCatalogue::score(&s, "give me the market brief please") >= 20);
    }

    #[test]
    fn trigger_hits_score_ten_each() {
        let s = skill("b", "zzz", "unrelated", &["morning update", "daily recap"], 0);
        let score = SkillCatalogue::score(&s, "morning update and daily recap now");
        assert_eq!(score, 20);
    }

    #[test]
    fn description_words_score_one_each() {
        let s = skill("b", "zzz", "summarize wallet balance headlines", &[], 0);
        let score = SkillCatalogue::score(&s, "what is my wallet balance");
        assert_eq!(score, 2);
    }

    #[test]
    fn below_threshold_selects_nothing() {
        let mut cat = SkillCatalogue::empty();
        cat.register(skill("b", "zzz", "summarize wallet balance", &[], 0));
        assert!(cat.match_skill("what is my wallet balance").is_none());
    }

    #[test]
    fn priority_breaks_ties_then_id() {
        let mut cat = SkillCatalogue::empty();
        cat.register(skill("beta", "status report", "none", &[], 1));
        cat.register(skill("alpha", "status report", "none", &[], 1));
        cat.register(skill("gamma", "status report", "none", &[], 9));
        let m = cat.match_skill("please run the status report").unwrap();
        assert_eq!(m.skill.id, "gamma");

        let mut cat2 = SkillCatalogue::empty();
        cat2.register(skill("beta", "status report", "none", &[], 1));
        cat2.register(skill("alpha", "status report", "none", &[], 1));
        let m2 = cat2.match_skill("please run the status report").unwrap();
        assert_eq!(m2.skill.id, "alpha");
    }

    #[test]
    fn normalization_ignores_punctuation_and_case() {
        let s = skill("brief", "Market Brief", "d", &[], 0);
        assert!(SkillCatalogue::score(&s, "MARKET-BRIEF, now!") >= 20);
    }

    #[test]
    fn catalogue_block_lists_all_sorted() {
        let mut cat = SkillCatalogue::empty();
        cat.register(skill("b", "second", "two", &[], 0));
        cat.register(skill("a", "first", "one", &[], 0));
        let block = cat.catalogue_block().unwrap();
        let first_pos = block.find("first").unwrap();
        let second_pos = block.find("second").unwrap();
        assert!(first_pos < second_pos);
        assert!(SkillCatalogue::empty().catalogue_block().is_none());
    }

    #[test]
    fn discover_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.md"),
            "---\nname: good skill\ndescription: a valid skill\n---\n\nDo it.",
        )
        .unwrap();
        std::fs::write(dir.path().join("bad.md"), "no frontmatter here").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let cat = SkillCatalogue::discover(dir.path());
        assert_eq!(cat.len(), 1);
        assert!(cat.get("good").is_some());
    }

    #[test]
    fn discover_missing_dir_is_empty() {
        let cat = SkillCatalogue::discover(Path::new("/nonexistent/skills"));
        assert!(cat.is_empty());
    }
}
