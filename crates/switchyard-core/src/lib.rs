// ABOUTME: Core data model for switchyard: conversations, session state, and tool-call types.
// ABOUTME: Pure data and invariants shared by the store and agent crates; performs no I/O.

pub mod conversation;
pub mod message;
pub mod record;
pub mod session;
pub mod tool;

pub use conversation::{Conversation, ConversationError};
pub use message::{ConversationMessage, Role, ToolCallRequest, ToolCallResult, ToolStatus};
pub use record::{ConfirmationOutcome, ToolCallRecord};
pub use session::{SessionKey, SessionState, TokenUsage};
pub use tool::{ParamSpec, ParamType, RiskLevel, ToolSchema};
