pub mod events;
pub mod mcp;

pub use events::{parse_line, turn_frame, AssistantEvent, ContentBlock};
pub use mcp::McpConfig;
