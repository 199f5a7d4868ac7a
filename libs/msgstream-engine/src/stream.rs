use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use msgstream_api::{MsgPack, Transport, TsMsg};

use crate::config::StreamConfig;
use crate::consumer::ConsumerSet;
use crate::dispatcher::UnmarshalDispatcher;
use crate::error::StreamError;
use crate::lock;
use crate::producer::{ProducerSet, encode_pack};
use crate::repack::{RepackFn, default_repack};

/// Lifecycle of a `MsgStream`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Started,
    Closed,
}

/// A producer set, a consumer set, a repack function and a dispatcher
/// composed into one lifecycle-managed stream.
///
/// Either side may be absent: a publish-only stream has no consumers and a
/// subscribe-only stream no producers.
pub struct MsgStream {
    name: String,
    state: Mutex<StreamState>,
    producers: Option<ProducerSet>,
    consumers: Option<ConsumerSet>,
    repack: RepackFn,
}

impl std::fmt::Debug for MsgStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgStream")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("producers", &self.producers)
            .field("consumers", &self.consumers)
            .finish()
    }
}

impl MsgStream {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::info!(stream = %name, "stream created");
        Self {
            name,
            state: Mutex::new(StreamState::Created),
            producers: None,
            consumers: None,
            repack: Arc::new(default_repack),
        }
    }

    pub fn with_producers(mut self, producers: ProducerSet) -> Self {
        self.producers = Some(producers);
        self
    }

    pub fn with_consumers(mut self, consumers: ConsumerSet) -> Self {
        self.consumers = Some(consumers);
        self
    }

    /// Собрать stream из конфигурации: bind producers, открыть subscriptions.
    pub fn from_config(
        config: &StreamConfig,
        transport: &dyn Transport,
        dispatcher: Arc<UnmarshalDispatcher>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let ctx = format!("stream '{}'", config.name);
        let mut stream = Self::new(config.name.clone());

        if !config.producer_channels.is_empty() {
            let producers = ProducerSet::bind(transport, &config.producer_channels)
                .map_err(|e| e.with_context(&ctx))?;
            stream = stream.with_producers(producers);
        }

        if !config.consumer_channels.is_empty() {
            let group = config
                .subscription
                .as_deref()
                .ok_or_else(|| StreamError::Config(format!("{ctx}: missing subscription")))?;
            let consumers = ConsumerSet::subscribe(
                transport,
                &config.consumer_channels,
                group,
                dispatcher,
                config.receive_buffer,
                config.subscribe_position,
            )
            .map_err(|e| e.with_context(&ctx))?;
            stream = stream.with_consumers(consumers);
        }
        Ok(stream)
    }

    /// Replace the repack function used by `produce`.
    pub fn set_repack_func<F>(&mut self, repack: F)
    where
        F: Fn(&[Arc<dyn TsMsg>], &[Vec<i32>]) -> Result<BTreeMap<i32, MsgPack>, StreamError>
            + Send
            + Sync
            + 'static,
    {
        self.repack = Arc::new(repack);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    pub fn producers(&self) -> Option<&ProducerSet> {
        self.producers.as_ref()
    }

    pub fn consumers(&self) -> Option<&ConsumerSet> {
        self.consumers.as_ref()
    }

    /// Launch the consumer pull tasks. Starting twice is a no-op; starting a
    /// closed stream fails. Without a tokio runtime the call fails with
    /// `Runtime` and the stream stays `Created`.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut state = lock(&self.state);
        match *state {
            StreamState::Started => return Ok(()),
            StreamState::Closed => return Err(StreamError::Closed),
            StreamState::Created => {}
        }
        if let Some(consumers) = &self.consumers {
            consumers.start()?;
        }
        *state = StreamState::Started;
        tracing::info!(stream = %self.name, "stream started");
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), StreamError> {
        match self.state() {
            StreamState::Started => Ok(()),
            StreamState::Created => Err(StreamError::NotStarted),
            StreamState::Closed => Err(StreamError::Closed),
        }
    }

    fn producer_set(&self) -> Result<&ProducerSet, StreamError> {
        match &self.producers {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(StreamError::Config(format!(
                "stream '{}' has no producer channels",
                self.name
            ))),
        }
    }

    /// Repack `pack` by hash key and publish each bucket to its channel.
    ///
    /// Bucket keys are `hash % channel_count` per row. Every bucket is
    /// validated and encoded before the first publish, so a shape or codec
    /// error sends nothing. Returns once every publish is acknowledged.
    pub async fn produce(&self, pack: &MsgPack) -> Result<(), StreamError> {
        self.ensure_started()?;
        if pack.is_empty() {
            return Ok(());
        }
        let producers = self.producer_set()?;
        let channels = producers.len();

        let hash_keys: Vec<Vec<i32>> = pack
            .msgs()
            .iter()
            .map(|msg| bucket_keys(msg.as_ref(), channels))
            .collect();
        let buckets = (self.repack)(pack.msgs(), &hash_keys)?;

        let mut frames = Vec::with_capacity(buckets.len());
        for (bucket, bucket_pack) in &buckets {
            let index = usize::try_from(*bucket)
                .ok()
                .filter(|&i| i < channels)
                .ok_or(StreamError::BucketOutOfRange {
                    bucket: *bucket,
                    channels,
                })?;
            frames.push((index, encode_pack(bucket_pack)?));
        }

        tracing::debug!(stream = %self.name, messages = pack.len(), buckets = frames.len(), "produce");
        for (index, records) in frames {
            producers.publish(index, records).await?;
        }
        Ok(())
    }

    /// Publish `pack` unchanged to every producer channel.
    pub async fn broadcast(&self, pack: &MsgPack) -> Result<(), StreamError> {
        self.ensure_started()?;
        if pack.is_empty() {
            return Ok(());
        }
        let producers = self.producer_set()?;
        let records = encode_pack(pack)?;
        tracing::debug!(stream = %self.name, messages = pack.len(), channels = producers.len(), "broadcast");
        for index in 0..producers.len() {
            producers.publish(index, records.clone()).await?;
        }
        Ok(())
    }

    /// Next delivered batch. Waits until one arrives; a `close` from another
    /// task ends the wait with `Closed`.
    pub async fn consume(&self) -> Result<MsgPack, StreamError> {
        self.ensure_started()?;
        let consumers = self.consumers.as_ref().ok_or_else(|| {
            StreamError::Config(format!("stream '{}' has no consumer channels", self.name))
        })?;
        consumers.consume().await
    }

    /// Records dropped on the consume path because they could not be decoded.
    pub fn dropped_records(&self) -> u64 {
        self.consumers.as_ref().map_or(0, |c| c.dropped_records())
    }

    /// Stop the pull tasks and release every transport binding. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == StreamState::Closed {
                return;
            }
            *state = StreamState::Closed;
        }
        if let Some(producers) = &self.producers {
            producers.close();
        }
        if let Some(consumers) = &self.consumers {
            consumers.close().await;
        }
        tracing::info!(stream = %self.name, dropped = self.dropped_records(), "stream closed");
    }
}

/// One bucket key per hash value: `hash % channels`.
fn bucket_keys(msg: &dyn TsMsg, channels: usize) -> Vec<i32> {
    let channels = channels as u64;
    msg.base()
        .hash_values
        .iter()
        .map(|&hash| (u64::from(hash) % channels) as i32)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use msgstream_api::{BaseMsg, ChannelProducer, MsgKind, SubscribePosition, TimeTickMsg, WireRecord};
    use transport_memory::MemoryTransport;

    use super::*;

    #[test]
    fn bucket_keys_wrap_by_channel_count() {
        let tick = TimeTickMsg {
            base: BaseMsg::new(1, 1, vec![0, 1, 5, u32::MAX]),
            ..Default::default()
        };
        assert_eq!(bucket_keys(&tick, 4), vec![0, 1, 1, 3]);
        assert_eq!(bucket_keys(&tick, 1), vec![0, 0, 0, 0]);
    }

    #[test]
    fn start_outside_runtime_leaves_stream_created() {
        let transport = MemoryTransport::default();
        let consumers = ConsumerSet::subscribe(
            &transport,
            &["ch".to_string()],
            "g",
            Arc::new(UnmarshalDispatcher::with_builtin_kinds()),
            4,
            SubscribePosition::Earliest,
        )
        .unwrap();
        let stream = MsgStream::new("s").with_consumers(consumers);

        assert!(matches!(stream.start(), Err(StreamError::Runtime(_))));
        assert_eq!(stream.state(), StreamState::Created);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            stream.start().unwrap();
            assert_eq!(stream.state(), StreamState::Started);
            let producer = transport.create_producer("ch").unwrap();
            let tick = TimeTickMsg::new(1, 8);
            producer
                .send(vec![WireRecord::new(MsgKind::TimeTick, tick.marshal().unwrap())])
                .await
                .unwrap();
            let got = tokio::time::timeout(Duration::from_secs(2), stream.consume())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got.end_ts(), 8);
            stream.close().await;
        });
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let stream = MsgStream::new("s");
        assert_eq!(stream.state(), StreamState::Created);
        assert!(matches!(stream.consume().await, Err(StreamError::NotStarted)));

        stream.start().unwrap();
        stream.start().unwrap();
        assert_eq!(stream.state(), StreamState::Started);

        stream.close().await;
        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(matches!(stream.start(), Err(StreamError::Closed)));
        assert!(matches!(stream.consume().await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn produce_without_producers_is_config_error() {
        let stream = MsgStream::new("s");
        stream.start().unwrap();
        let pack = MsgPack::new(vec![Arc::new(TimeTickMsg::new(1, 1)) as Arc<dyn TsMsg>]);
        assert!(matches!(stream.produce(&pack).await, Err(StreamError::Config(_))));
        assert!(stream.produce(&MsgPack::default()).await.is_ok());
    }
}
