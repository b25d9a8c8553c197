#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::domain::ports::ConfigProvider;
use crate::utils::error::Result;
use crate::utils::logger::LogFormat;
use crate::utils::validation::{validate_non_empty_string, validate_path, validate_range, Validate};
use serde::{Deserialize, Serialize};
use toml_config::FileConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WEIGHTS_PATH: &str = "model_weights.pth";
pub const DEFAULT_BODY_LIMIT_MB: usize = 32;
pub const MAX_BODY_LIMIT_MB: usize = 1024;

/// Fully resolved server settings: defaults, then the TOML file, then CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub weights_path: String,
    pub body_limit_mb: usize,
    pub log_format: LogFormat,
    pub verbose: bool,
    pub monitor: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            weights_path: DEFAULT_WEIGHTS_PATH.to_string(),
            body_limit_mb: DEFAULT_BODY_LIMIT_MB,
            log_format: LogFormat::default(),
            verbose: false,
            monitor: false,
        }
    }
}

impl ServerConfig {
    /// Overlay the values present in a config file.
    pub fn merge_file(mut self, file: &FileConfig) -> Self {
        if let Some(server) = &file.server {
            if let Some(host) = &server.host {
                self.host = host.clone();
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(limit) = server.body_limit_mb {
                self.body_limit_mb = limit;
            }
        }
        if let Some(model) = &file.model {
            if let Some(path) = &model.weights_path {
                self.weights_path = path.clone();
            }
        }
        if let Some(logging) = &file.logging {
            if let Some(format) = logging.format {
                self.log_format = format;
            }
            self.verbose |= logging.verbose.unwrap_or(false);
            self.monitor |= logging.monitor.unwrap_or(false);
        }
        self
    }
}

impl ConfigProvider for ServerConfig {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn weights_path(&self) -> &str {
        &self.weights_path
    }

    fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }

    fn monitor_enabled(&self) -> bool {
        self.monitor
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("server.host", &self.host)?;
        validate_range("server.port", self.port, 1, u16::MAX)?;
        validate_path("model.weights_path", &self.weights_path)?;
        validate_range("server.body_limit_mb", self.body_limit_mb, 1, MAX_BODY_LIMIT_MB)?;
        Ok(())
    }
}
