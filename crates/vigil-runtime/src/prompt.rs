//! System prompt assembly: persona, runtime time context, bootstrap memory,
//! skill catalogue and active skill, execution plan, and a tool-routing
//! hint derived from the user text.

use vigil_memory::MemoryManager;
use vigil_skills::SkillCatalogue;

use crate::plan::ExecutionPlan;

/// Concatenate the prompt sections in their fixed order, skipping empties.
pub fn build_system_prompt(
    persona: &str,
    memory: &MemoryManager,
    skills: &SkillCatalogue,
    active_skill: Option<&vigil_skills::Skill>,
    plan: Option<&ExecutionPlan>,
    user_text: &str,
) -> String {
    let mut sections: Vec<String> = vec![persona.trim().to_string()];

    sections.push(time_context());

    let bootstrap = memory.bootstrap_context();
    if !bootstrap.is_empty() {
        sections.push(bootstrap);
    }

    if let Some(block) = skills.catalogue_block() {
        sections.push(block.trim_end().to_string());
    }

    if let Some(skill) = active_skill {
        sections.push(format!(
            "Active Skill Instructions ({}):\n{}",
            skill.name, skill.body
        ));
    }

    if let Some(plan) = plan {
        sections.push(plan.render().trim_end().to_string());
    }

    if let Some(hint) = tool_hint(user_text) {
        sections.push(hint);
    }

    sections.join("\n\n")
}

/// Local-timezone date/time plus UTC, so the model never guesses the clock.
fn time_context() -> String {
    let local = chrono::Local::now();
    let utc = chrono::Utc::now();
    format!(
        "Current time: {} local ({}) / {} UTC.",
        local.format("%A %Y-%m-%d %H:%M:%S"),
        local.format("%Z"),
        utc.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// A nudge toward the right tool family when the user text makes the need
/// obvious. Absent for ordinary conversation.
pub fn tool_hint(user_text: &str) -> Option<String> {
    let lower = user_text.to_lowercase();
    let hint = if lower.contains("wallet") || lower.contains("balance") {
        "The user is asking about the wallet. Use the wallet_* tools; never quote a balance from memory."
    } else if ["latest", "news", "price", "today", "current", "right now"]
        .iter()
        .any(|k| lower.contains(k))
    {
        "The user wants current information. Use perplexity_search before answering."
    } else if lower.contains("remind") || lower.contains("schedule") {
        "The user wants scheduling. Use schedule_reminder / list_reminders / cancel_reminder."
    } else if lower.contains("post") || lower.contains("tweet") || lower.contains("mentions") {
        "The user is referring to the social network. Use social_post / social_mentions."
    } else if lower.contains("remember") || lower.contains("memory") {
        "The user is referring to durable memory. Use remember_this or write_memory_entry."
    } else {
        return None;
    };
    Some(format!("Tool hint: {hint}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_matches_tool_families() {
        assert!(tool_hint("what's your wallet balance").unwrap().contains("wallet_*"));
        assert!(tool_hint("latest eth news").unwrap().contains("perplexity_search"));
        assert!(tool_hint("remind me later").unwrap().contains("schedule_reminder"));
        assert!(tool_hint("check mentions").unwrap().contains("social_"));
        assert!(tool_hint("how are you").is_none());
    }

    #[test]
    fn prompt_contains_persona_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryManager::new(dir.path(), 5, 3);
        let skills = SkillCatalogue::empty();
        let prompt =
            build_system_prompt("You are Vigil.", &memory, &skills, None, None, "hello");
        assert!(prompt.starts_with("You are Vigil."));
        assert!(prompt.contains("Current time:"));
        assert!(prompt.contains("UTC"));
        assert!(!prompt.contains("Available skills"));
    }

    #[test]
    fn prompt_includes_memory_and_active_skill() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryManager::new(dir.path(), 5, 3);
        memory.remember_this("Operator prefers terse updates");

        let mut skills = SkillCatalogue::empty();
        skills.register(vigil_skills::Skill {
            id: "brief".into(),
            name: "market brief".into(),
            description: "summarize the market".into(),
            triggers: vec![],
            priority: 0,
            body: "1. Check balance.\n2. Search headlines.".into(),
        });
        let active = skills.get("brief").cloned();

        let prompt = build_system_prompt(
            "Persona.",
            &memory,
            &skills,
            active.as_ref(),
            None,
            "market brief please",
        );
        assert!(prompt.contains("=== SEMANTIC MEMORY"));
        assert!(prompt.contains("Available skills:"));
        assert!(prompt.contains("Active Skill Instructions (market brief):"));
        assert!(prompt.contains("Search headlines."));
    }
}
