use std::collections::HashSet;

use serde::Deserialize;

use msgstream_api::SubscribePosition;

use crate::error::StreamError;

/// Configuration of one message stream, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Stream name, used in logs.
    pub name: String,

    /// Channels to publish to. Bucket `i` of a repacked batch goes to
    /// `producer_channels[i]`.
    #[serde(default)]
    pub producer_channels: Vec<String>,

    /// Channels to subscribe to.
    #[serde(default)]
    pub consumer_channels: Vec<String>,

    /// Consumer group name. Required when `consumer_channels` is set.
    #[serde(default)]
    pub subscription: Option<String>,

    /// Capacity of the delivery buffer, in batches.
    #[serde(default = "default_receive_buffer")]
    pub receive_buffer: usize,

    #[serde(default)]
    pub subscribe_position: SubscribePosition,
}

fn default_receive_buffer() -> usize {
    1024
}

impl StreamConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, StreamError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StreamError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, StreamError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.name.trim().is_empty() {
            return Err(StreamError::Config("stream name must not be empty".into()));
        }
        if self.receive_buffer == 0 {
            return Err(StreamError::Config(format!(
                "stream '{}': receive_buffer must be greater than 0",
                self.name
            )));
        }
        check_channels(&self.name, "producer_channels", &self.producer_channels)?;
        check_channels(&self.name, "consumer_channels", &self.consumer_channels)?;

        let has_group = self.subscription.as_deref().is_some_and(|s| !s.trim().is_empty());
        match (self.consumer_channels.is_empty(), has_group) {
            (false, false) => Err(StreamError::Config(format!(
                "stream '{}': consumer_channels require a subscription name",
                self.name
            ))),
            (true, true) => Err(StreamError::Config(format!(
                "stream '{}': subscription set but no consumer_channels",
                self.name
            ))),
            _ => Ok(()),
        }
    }
}

fn check_channels(stream: &str, field: &str, channels: &[String]) -> Result<(), StreamError> {
    let mut seen = HashSet::new();
    for channel in channels {
        if channel.trim().is_empty() {
            return Err(StreamError::Config(format!(
                "stream '{stream}': {field} contains an empty channel name"
            )));
        }
        if !seen.insert(channel.as_str()) {
            return Err(StreamError::Config(format!(
                "stream '{stream}': {field} lists '{channel}' twice"
            )));
        }
    }
    Ok(())
}
