//! The AI conversation core: skill routing, the streaming proxy, and the
//! conversation store.

pub mod client;
pub mod conversation;
pub mod router;
pub mod skills;
pub mod stream;

pub use client::{ChatMessage, CompletionBackend, LlmClient, LlmConfig};
pub use conversation::ConversationService;
pub use router::route;
pub use skills::Skill;
pub use stream::{ChatEvent, ChatRequest, ChatService};
