use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::transcode::session::SessionSettings;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments of the server binary.
///
/// The configuration file carries the full configuration; the optional flags
/// (or their environment variables) override single values from it.
#[derive(Parser, Debug, Clone)]
#[command(name = "videoingest")]
#[command(version)]
#[command(about = "Live video ingest server feeding an external transcoder")]
pub struct CommandLine {
    /// Path of the TOML configuration file
    pub config_file: PathBuf,

    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`
    #[arg(long, env = "VIDEOINGEST_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Inactivity timeout of a session in seconds
    #[arg(long, env = "VIDEOINGEST_SESSION_TIMEOUT_SECS")]
    pub session_timeout_secs: Option<u64>,
}

/// Application configuration.
///
/// # Example
///
/// ```toml
/// [server]
/// bind_address = "0.0.0.0:8080"
/// session_timeout_secs = 10
///
/// [transcode]
/// command = "/usr/bin/ffmpeg"
/// log_file_path = "/var/log/videoingest"
/// output_path = "/var/www/videoingest"
/// ```
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub transcode: TranscodeConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Loads the file named on the command line and applies the overrides.
    pub fn from_command_line(args: &CommandLine) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&args.config_file)?;
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, args: &CommandLine) {
        if let Some(ref bind_address) = args.bind_address {
            debug!("Overriding bind_address with {}", bind_address);
            self.server.bind_address = bind_address.clone();
        }
        if let Some(timeout) = args.session_timeout_secs {
            debug!("Overriding session_timeout_secs with {}", timeout);
            self.server.session_timeout_secs = timeout;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transcode.command.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "transcode.command must not be empty".to_string(),
            ));
        }
        if self.server.session_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "server.session_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.server.max_sessions == 0 {
            return Err(ConfigError::InvalidValue(
                "server.max_sessions must be greater than 0".to_string(),
            ));
        }
        if self.transcode.segment_duration_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "transcode.segment_duration_secs must be greater than 0".to_string(),
            ));
        }
        self.bind_address()?;
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind_address.parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "server.bind_address '{}': {}",
                self.server.bind_address, e
            ))
        })
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.server.session_retention_secs)
    }

    /// Settings handed to every transcode session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            command: self.transcode.command.clone(),
            log_dir: self.transcode.log_file_path.clone(),
            timeout: Duration::from_secs(self.server.session_timeout_secs),
        }
    }
}
