pub mod error;
pub mod store;
pub mod types;

pub use error::SessionError;
pub use store::Store;
pub use types::{PersistedSession, SessionsDocument};
