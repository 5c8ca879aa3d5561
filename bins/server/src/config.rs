use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

pub use pubsub_api::OverflowPolicy;
use storage_jsonl::JsonlLogConfig;
use storage_memory::MemoryLogConfig;
use topic_engine::{SubscriberOptions, MAX_SUBSCRIBER_BUFFER};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "pubsub-server", about = "Topic pub/sub broker with replay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Listen address, overrides `bind` from the config
    #[arg(long, env = "BIND_ADDR")]
    pub bind: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long shutdown waits for open connections before aborting them.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// Message log backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogConfig {
    Memory(MemoryLogConfig),
    Jsonl(JsonlLogConfig),
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig::Jsonl(JsonlLogConfig::default())
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriberConfig {
    /// Queue capacity per subscriber.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
    /// What fan-out does when a queue is full.
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// SSE keep-alive comment interval, 0 disables.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
            overflow: OverflowPolicy::default(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl SubscriberConfig {
    pub fn options(&self) -> SubscriberOptions {
        SubscriberOptions {
            buffer: self.buffer,
            overflow: self.overflow,
        }
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}
fn default_buffer() -> usize {
    1024
}
fn default_keep_alive_secs() -> u64 {
    15
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let config: Self = toml::from_str(content)?;
        let buffer = config.subscriber.buffer;
        if !(1..=MAX_SUBSCRIBER_BUFFER).contains(&buffer) {
            return Err(serde::de::Error::custom(format!(
                "subscriber.buffer must be within 1..={MAX_SUBSCRIBER_BUFFER}, got {buffer}"
            )));
        }
        Ok(config)
    }
}
