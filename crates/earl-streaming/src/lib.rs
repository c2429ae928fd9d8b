pub mod poster;
pub mod response;
pub mod segment;

pub use poster::ChatPoster;
pub use response::{StreamingResponse, DEBOUNCE_MS};
pub use segment::{format_tool_segment, full_text, Segment};
