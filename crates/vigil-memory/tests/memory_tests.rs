use vigil_core::{Message, Role};
use vigil_memory::{GoalStatus, MemoryManager};

// ── Cross-store flows ──────────────────────────────────────────

mod turns {
    use super::*;

    #[test]
    fn a_week_of_turns_builds_layered_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(dir.path(), 3, 3);

        mem.record_turn(
            "I prefer bullet-point updates. We need to grow the follower count.",
            "Noted. Starting with a posting cadence.",
        );
        mem.record_turn(
            "Also, never post between midnight and six.",
            "Understood, quiet hours respected.",
        );
        mem.record_turn(
            "How is the follower goal going?",
            "Follower count is up 4% this week.",
        );

        let ctx = mem.bootstrap_context();
        assert!(ctx.contains("=== SEMANTIC MEMORY"));
        assert!(ctx.contains("Prefers bullet-point updates"));
        assert!(ctx.contains("=== PROCEDURAL MEMORY"));
        assert!(ctx.contains("never post between midnight and six"));
        assert!(ctx.contains("=== PERSISTENT GOALS"));
        assert!(ctx.contains("grow the follower count"));
        // Turn 3 hit the periodic episodic write (every 3 turns).
        assert!(ctx.contains("=== EPISODIC MEMORY"));

        let health = mem.health();
        assert!(health.writes.get("semantic").copied().unwrap_or(0) >= 1);
        assert!(health.writes.get("procedural").copied().unwrap_or(0) >= 1);
        assert_eq!(health.goals_by_status.get("active"), Some(&1));
        assert!(health.last_write_at.is_some());
    }

    #[test]
    fn repeated_turns_only_skip_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(dir.path(), 10, 3);
        mem.record_turn("I prefer dark mode.", "Noted.");
        let writes_before = mem.health().writes.clone();

        mem.record_turn("I prefer dark mode.", "Noted again.");
        let health = mem.health();
        assert_eq!(health.writes.get("semantic"), writes_before.get("semantic"));
        assert!(health.duplicate_skips >= 1);
    }
}

mod persistence {
    use super::*;

    #[test]
    fn memory_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mem = MemoryManager::new(dir.path(), 5, 3);
            mem.remember_this("The relay node lives in the basement");
            mem.write_goal_entry("migrate the relay", Some("ordered hardware"), None, vec![]);
        }

        let reopened = MemoryManager::new(dir.path(), 5, 3);
        let ctx = reopened.bootstrap_context();
        assert!(ctx.contains("The relay node lives in the basement"));
        assert!(ctx.contains("migrate the relay"));
        assert_eq!(
            reopened.remember_this("the relay node lives in the basement"),
            "Already remembered"
        );
    }

    #[tokio::test]
    async fn flush_session_context_is_atomic_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(dir.path(), 5, 3);

        let first = vec![
            Message::text(Role::User, "goal: wire the dashboard"),
            Message::text(Role::Assistant, "Wiring started."),
        ];
        mem.flush_before_compaction(&first).await;
        let path = dir.path().join("semantic/session_context.md");
        let v1 = std::fs::read_to_string(&path).unwrap();
        assert!(v1.contains("wire the dashboard"));

        let second = vec![
            Message::text(Role::User, "goal: publish the weekly recap"),
            Message::text(Role::Assistant, "Recap drafted and queued. Next: publish."),
        ];
        mem.flush_before_compaction(&second).await;
        let v2 = std::fs::read_to_string(&path).unwrap();
        assert_ne!(v1, v2);
        assert!(v2.contains("Progress and Next Steps: Recap drafted and queued"));
        // No leftover temp file from the atomic replace.
        assert!(!dir.path().join("semantic/session_context.tmp").exists());
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn completion_words_close_the_goal() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(dir.path(), 10, 3);
        mem.record_turn("We need to rotate the api keys.", "On it.");
        mem.record_turn(
            "Any news on the api keys?",
            "The api keys rotation is finished.",
        );

        let health = mem.health();
        assert_eq!(health.goals_by_status.get("completed"), Some(&1));
        assert_eq!(health.goals_by_status.get("active"), Some(&0));
    }

    #[test]
    fn tool_status_update_roundtrips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mem = MemoryManager::new(dir.path(), 10, 3);
        mem.write_goal_entry("archive old logs", None, Some("paused"), vec!["ops".into()]);

        let raw = std::fs::read_to_string(dir.path().join("goals/goals.md")).unwrap();
        assert!(raw.contains("## archive old logs"));
        assert!(raw.contains("- status: paused"));
        assert!(raw.contains("- tags: ops"));

        let parsed = vigil_memory::goals::parse_goals(&raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].status, GoalStatus::Paused);
    }
}
