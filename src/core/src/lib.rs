pub mod configuration;
pub mod error_handling;
pub mod session_management;
pub mod transcode;
pub mod web_interface;

pub use session_management::SessionManager;
pub use transcode::{SessionState, TranscodeSession};
