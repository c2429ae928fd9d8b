//! earl-mattermost — the Mattermost REST + WebSocket binding (§4.5/§4.6).
//!
//! [`client::MattermostClient`] implements [`earl_streaming::ChatPoster`] and
//! [`earl_questions::ReactionPoster`] against the Mattermost REST API v4.
//! [`listener::MattermostListener`] drives the companion WebSocket, turning
//! `posted` and `reaction_added` events into [`types::InboundPost`] /
//! [`types::InboundReaction`] values delivered to a
//! [`listener::MattermostEventHandler`].

pub mod client;
pub mod error;
pub mod listener;
pub mod types;

pub use client::MattermostClient;
pub use error::{MattermostError, Result};
pub use listener::{MattermostEventHandler, MattermostListener};
pub use types::{InboundPost, InboundReaction};
