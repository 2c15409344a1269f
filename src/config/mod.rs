//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for `serve`)
//!
//! Only deployment settings live here. Labels, target class, secret,
//! normalization constants and hints are fixed by the challenge.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FlagnetError, Result};
use crate::inference::DEFAULT_MODEL_PATH;
use crate::preprocess::{Preprocessor, DEFAULT_MAX_PIXELS};
use crate::server::ServerConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Model configuration
    #[serde(default)]
    pub model: ModelSection,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| FlagnetError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| FlagnetError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/flagnet/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flagnet").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("FLAGNET_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("FLAGNET_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(size) = std::env::var("FLAGNET_MAX_BODY_SIZE") {
            if let Ok(size) = size.parse() {
                config.server.max_body_size = size;
            }
        }
        if let Ok(pixels) = std::env::var("FLAGNET_MAX_IMAGE_PIXELS") {
            if let Ok(pixels) = pixels.parse() {
                config.server.max_image_pixels = pixels;
            }
        }
        if let Ok(path) = std::env::var("FLAGNET_MODEL_PATH") {
            config.model.path = PathBuf::from(path);
        }

        config
    }

    /// Merge with another config (other's non-default values take precedence)
    pub fn merge(self, other: Self) -> Self {
        let server_default = ServerSection::default();
        let model_default = ModelSection::default();

        Self {
            server: ServerSection {
                host: if other.server.host == server_default.host {
                    self.server.host
                } else {
                    other.server.host
                },
                port: if other.server.port == server_default.port {
                    self.server.port
                } else {
                    other.server.port
                },
                max_body_size: if other.server.max_body_size == server_default.max_body_size {
                    self.server.max_body_size
                } else {
                    other.server.max_body_size
                },
                max_image_pixels: if other.server.max_image_pixels
                    == server_default.max_image_pixels
                {
                    self.server.max_image_pixels
                } else {
                    other.server.max_image_pixels
                },
                cors: self.server.cors && other.server.cors,
                logging: self.server.logging && other.server.logging,
            },
            model: ModelSection {
                path: if other.model.path == model_default.path {
                    self.model.path
                } else {
                    other.model.path
                },
                base_width: if other.model.base_width == model_default.base_width {
                    self.model.base_width
                } else {
                    other.model.base_width
                },
            },
        }
    }

    /// Build the HTTP server configuration
    pub fn server_config(&self) -> Result<ServerConfig> {
        let addr = self
            .server
            .listen_addr()
            .parse()
            .map_err(|e| FlagnetError::Config(format!("Invalid listen address: {e}")))?;

        let mut config = ServerConfig::default()
            .with_addr(addr)
            .with_max_body_size(self.server.max_body_size);
        if !self.server.cors {
            config = config.without_cors();
        }
        if !self.server.logging {
            config = config.without_logging();
        }
        Ok(config)
    }

    /// Build the upload preprocessor
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new().with_max_pixels(self.server.max_image_pixels)
    }
}

/// HTTP server section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Maximum decoded image size in pixels (width × height)
    pub max_image_pixels: u64,

    /// Enable permissive CORS
    pub cors: bool,

    /// Enable request tracing
    pub logging: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            max_image_pixels: DEFAULT_MAX_PIXELS,
            cors: true,
            logging: true,
        }
    }
}

impl ServerSection {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Model section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Path to the safetensors parameter file
    pub path: PathBuf,

    /// Network stem width (64 for the standard ResNet-18)
    pub base_width: usize,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            base_width: 64,
        }
    }
}
