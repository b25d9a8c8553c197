use crate::config::toml_config::FileConfig;
use crate::config::ServerConfig;
use crate::utils::error::Result;
use crate::utils::logger::LogFormat;
use crate::utils::validation::{validate_path, validate_positive_number, validate_url, Validate};
use clap::Parser;
use std::path::PathBuf;

/// Flags for the `digit-serve` binary. Unset flags fall back to the config file, then defaults.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "digit-serve")]
#[command(about = "HTTP service that classifies handwritten digit images")]
pub struct ServeArgs {
    #[arg(long, help = "Bind address [default: 0.0.0.0]")]
    pub host: Option<String>,

    #[arg(long, help = "Listen port [default: 8000]")]
    pub port: Option<u16>,

    #[arg(long, help = "Weight file, .pth or .safetensors [default: model_weights.pth]")]
    pub weights: Option<String>,

    #[arg(long, help = "Maximum request body size in MiB, 1-1024 [default: 32]")]
    pub body_limit_mb: Option<usize>,

    #[arg(long, help = "TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU and memory usage")]
    pub monitor: bool,
}

impl ServeArgs {
    pub fn resolve(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::default();
        if let Some(path) = &self.config {
            let file = FileConfig::from_file(path)?;
            file.validate()?;
            config = config.merge_file(&file);
        }

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(weights) = &self.weights {
            config.weights_path = weights.clone();
        }
        if let Some(limit) = self.body_limit_mb {
            config.body_limit_mb = limit;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.verbose |= self.verbose;
        config.monitor |= self.monitor;
        Ok(config)
    }
}

/// Flags for the `batch-client` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "batch-client")]
#[command(about = "Send every image in a directory to a digit-serve instance")]
pub struct BatchClientArgs {
    #[arg(long, default_value = "http://127.0.0.1:8000/predict")]
    pub url: String,

    #[arg(long, default_value = "test")]
    pub image_dir: String,

    #[arg(long, default_value = "result.csv")]
    pub output: String,

    #[arg(long, default_value = "10")]
    pub concurrency: usize,

    #[arg(long, default_value = "1", help = "Repeat the whole directory this many times")]
    pub iterations: usize,

    #[arg(long, default_value = "60")]
    pub timeout_secs: u64,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Validate for BatchClientArgs {
    fn validate(&self) -> Result<()> {
        validate_url("url", &self.url)?;
        validate_path("image_dir", &self.image_dir)?;
        validate_path("output", &self.output)?;
        validate_positive_number("concurrency", self.concurrency, 1)?;
        validate_positive_number("iterations", self.iterations, 1)?;
        validate_positive_number("timeout_secs", self.timeout_secs as usize, 1)?;
        Ok(())
    }
}
