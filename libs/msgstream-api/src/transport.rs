use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::kind::MsgKind;

/// One marshalled message as it travels through the transport.
///
/// The kind travels out-of-band next to the payload so the consumer can
/// pick a decoder before touching the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub kind: MsgKind,
    pub payload: Vec<u8>,
}

impl WireRecord {
    pub fn new(kind: MsgKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

/// Where a consumer group starts on a channel it has never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribePosition {
    /// Oldest retained frame.
    #[default]
    Earliest,
    /// Only frames published after the subscription.
    Latest,
}

/// Publish binding to a single channel.
pub trait ChannelProducer: Send + Sync {
    fn channel(&self) -> &str;

    /// Append `records` to the channel as one frame. Resolves once the
    /// transport has acknowledged the frame, or with the failure.
    fn send(
        &self,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>>;

    /// Release the binding. Later sends fail with a `Closed` error.
    fn close(&self);
}

/// Pull side of one channel for one consumer group.
///
/// Subscriptions sharing a group on the same channel compete: every frame
/// is handed to exactly one of them.
pub trait ChannelSubscription: Send {
    fn channel(&self) -> &str;

    fn group(&self) -> &str;

    /// Next frame in publish order. `None` = the transport shut the
    /// subscription down.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Vec<WireRecord>>> + Send + '_>>;
}

/// The durable log / broker the stream runs on.
pub trait Transport: Send + Sync {
    fn create_producer(&self, channel: &str) -> Result<Box<dyn ChannelProducer>, TransportError>;

    fn subscribe(
        &self,
        channel: &str,
        group: &str,
        position: SubscribePosition,
    ) -> Result<Box<dyn ChannelSubscription>, TransportError>;
}

/// Builds a transport from a JSON config string (`"{}"` = defaults).
pub trait TransportFactory: Send + Sync {
    fn create(&self, config_json: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
