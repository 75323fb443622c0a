//! # vigil-runtime
//!
//! The agent loop and its surroundings: streaming LLM dialogue with
//! model-issued tool invocations, the deterministic intent router that
//! answers well-specified requests without an LLM call, post-hoc integrity
//! guards that coerce tool-backed truth into replies, and the runtime
//! facade front-ends talk to.

pub mod agent;
pub mod guards;
pub mod plan;
pub mod prompt;
pub mod router;
pub mod runtime;
pub mod tools;

pub use agent::{Agent, AgentReply, TokenReport};
pub use plan::ExecutionPlan;
pub use router::RoutedIntent;
pub use runtime::{Runtime, RuntimeStatus};
pub use tools::{
    BrowserProvider, Collaborators, SearchProvider, SocialProvider, ToolRegistry, WalletProvider,
};
