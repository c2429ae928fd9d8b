pub mod error;
pub mod registry;
pub mod session;
pub mod stats;

pub use error::{Result, SessionError};
pub use registry::Registry;
pub use session::{LaunchConfig, PermissionConfig, Session, SessionMode};
pub use stats::Stats;
