pub mod mediator;
pub mod types;

pub use mediator::{HandleToolUseResult, Mediator, ReactionPoster, ReactionResult};
pub use types::{parse_questions, PendingInteraction, Question, QuestionOption};
