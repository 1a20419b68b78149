//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `STUDYCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `STUDYCTL_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `STUDYCTL_DISPATCH__BROKER_HOST=rabbit.internal` sets the `dispatch.broker_host` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Point at the resource server
//! STUDYCTL_RESOURCE_STORE__URL="http://resources.internal:8083"
//!
//! # Where uploaded files live
//! STUDYCTL_UPLOADS__FOLDER=/var/lib/studyctl
//!
//! # Answer client-source uploads before the broker confirms the publish
//! STUDYCTL_DISPATCH__MODE=fire_and_forget
//! ```
//!
//! The loaded [`Config`] is immutable: it is built once in `main` and handed to each
//! component's constructor.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "STUDYCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Remote document store holding surveys and task steps
    pub resource_store: ResourceStoreConfig,
    /// Sandbox root and limits for uploaded files
    pub uploads: UploadsConfig,
    /// Message broker settings for client-source processing jobs
    pub dispatch: DispatchConfig,
    /// Cookie carrying the caller's bearer credential
    pub session: SessionConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceStoreConfig {
    /// Base URL, e.g. `http://localhost:8083`. API paths are joined onto it.
    pub url: Url,
    /// Per-request timeout for calls to the store
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ResourceStoreConfig {
    fn default() -> Self {
        Self {
            url: Url::parse("http://localhost:8083").expect("static URL is valid"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    /// Sandbox root. Files land under `<folder>/files/`, staging under `<folder>/.staging/`.
    pub folder: PathBuf,
    /// Maximum accepted request body for upload routes, in bytes
    pub size_limit: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("./uploads"),
            size_limit: 5 * 1024 * 1024,
        }
    }
}

/// When the client-source upload answers relative to the queue publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Wait for the broker to confirm the publish before answering; failures become 500s.
    #[default]
    Confirmed,
    /// Answer as soon as the broker connection is open and publish in the background.
    /// Publish failures are only logged.
    FireAndForget,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Broker host, optionally with port and vhost (`amqp://` is prepended)
    pub broker_host: String,
    /// Durable queue that receives client-source jobs
    pub queue: String,
    pub mode: DispatchMode,
}

impl DispatchConfig {
    pub fn broker_uri(&self) -> String {
        format!("amqp://{}", self.broker_host)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            queue: "babel".to_string(),
            mode: DispatchMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the cookie holding the bearer token issued at login
    pub cookie_name: String,
    /// Where callers without a bearer cookie are sent
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "bearer".to_string(),
            login_path: "/join".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            resource_store: ResourceStoreConfig::default(),
            uploads: UploadsConfig::default(),
            dispatch: DispatchConfig::default(),
            session: SessionConfig::default(),
            enable_otel_export: false,
        }
    }
}

impl Config {
    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("STUDYCTL_").split("__"))
    }

    /// Load and validate configuration from the file named in `args` plus the environment.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let config: Self = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.uploads.size_limit == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.size_limit must be greater than zero".to_string(),
            });
        }

        if self.dispatch.queue.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: dispatch.queue cannot be empty".to_string(),
            });
        }

        if self.dispatch.broker_host.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: dispatch.broker_host cannot be empty".to_string(),
            });
        }

        match self.resource_store.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Internal {
                    operation: format!("Config validation: resource_store.url must use http or https, got '{other}'"),
                });
            }
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: session.cookie_name cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}
