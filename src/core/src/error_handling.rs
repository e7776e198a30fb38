pub mod types;

pub use types::{ConfigError, SessionError, TranscodeError, WebError};
