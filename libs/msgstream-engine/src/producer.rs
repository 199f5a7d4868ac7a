use msgstream_api::{ChannelProducer, MsgPack, Transport, WireRecord};

use crate::error::StreamError;

/// One publish binding per destination channel. Bucket `i` of a repacked
/// batch is published through binding `i`.
pub struct ProducerSet {
    producers: Vec<Box<dyn ChannelProducer>>,
}

impl std::fmt::Debug for ProducerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerSet")
            .field("channels", &self.channels())
            .finish()
    }
}

impl ProducerSet {
    /// Create a binding for every channel, in order.
    pub fn bind(transport: &dyn Transport, channels: &[String]) -> Result<Self, StreamError> {
        let mut producers = Vec::with_capacity(channels.len());
        for channel in channels {
            let producer = transport
                .create_producer(channel)
                .map_err(|e| StreamError::transport(channel.as_str(), e))?;
            tracing::info!(%channel, "producer bound");
            producers.push(producer);
        }
        Ok(Self { producers })
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn channels(&self) -> Vec<&str> {
        self.producers.iter().map(|p| p.channel()).collect()
    }

    pub fn channel(&self, index: usize) -> Option<&str> {
        self.producers.get(index).map(|p| p.channel())
    }

    /// Publish one frame to binding `index` and wait for the transport's ack.
    pub async fn publish(&self, index: usize, records: Vec<WireRecord>) -> Result<(), StreamError> {
        let producer = self.producers.get(index).ok_or(StreamError::BucketOutOfRange {
            bucket: i32::try_from(index).unwrap_or(i32::MAX),
            channels: self.producers.len(),
        })?;
        producer.send(records).await.map_err(|e| {
            tracing::error!(channel = %producer.channel(), error = %e, "publish failed");
            StreamError::transport(producer.channel(), e)
        })
    }

    /// Release every binding.
    pub fn close(&self) {
        for producer in &self.producers {
            producer.close();
        }
    }
}

/// Marshal every message of `pack` into wire records, in order.
pub fn encode_pack(pack: &MsgPack) -> Result<Vec<WireRecord>, StreamError> {
    pack.msgs()
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let payload = msg
                .marshal()
                .map_err(|e| StreamError::from(e).with_context(format!("message {i} ({})", msg.kind())))?;
            Ok(WireRecord::new(msg.kind(), payload))
        })
        .collect()
}
