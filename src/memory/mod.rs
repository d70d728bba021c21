//! Interaction memory: ephemeral per-session context and durable
//! conversation threads.

pub mod conversations;
pub mod session;

pub use conversations::{Conversation, ConversationStore, Message, MessageRole, StoreError};
pub use session::{SessionContext, SessionMemory, SessionTurn};
