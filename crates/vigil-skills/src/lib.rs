//! # vigil-skills
//!
//! The skill catalogue: a read-only mapping of `id → skill` loaded at
//! startup from markdown-with-frontmatter files, plus the match scorer that
//! picks the skill to inject for a given user text.

pub mod catalogue;
pub mod definition;

pub use catalogue::{SkillCatalogue, SkillMatch};
pub use definition::Skill;
