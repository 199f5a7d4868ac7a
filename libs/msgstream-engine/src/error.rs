use msgstream_api::{CodecError, MsgKind, ShapeError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("message {index}: {source}")]
    ShapeMismatch {
        index: usize,
        #[source]
        source: ShapeError,
    },

    #[error("got hash keys for {keys} messages, batch has {messages}")]
    KeyCountMismatch { messages: usize, keys: usize },

    #[error("message {index}: unsupported kind for repack: {kind}")]
    UnsupportedRepackKind { index: usize, kind: MsgKind },

    #[error("bucket {bucket} has no producer channel ({channels} bound)")]
    BucketOutOfRange { bucket: i32, channels: usize },

    #[error("no decoder registered for kind {0}")]
    UnknownKind(MsgKind),

    #[error("encoding: {0}")]
    Encoding(String),

    #[error("decoding: {0}")]
    Decoding(String),

    #[error("channel '{channel}': {source}")]
    Transport {
        channel: String,
        #[source]
        source: TransportError,
    },

    #[error("stream is closed")]
    Closed,

    #[error("stream is not started")]
    NotStarted,

    #[error("no async runtime: {0}")]
    Runtime(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn transport(channel: impl Into<String>, source: TransportError) -> Self {
        StreamError::Transport {
            channel: channel.into(),
            source,
        }
    }

    /// Add context to the error.
    ///
    /// For `Transport`, context goes into the inner `TransportError`.
    /// For message-carrying variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            StreamError::Transport { channel, source } => StreamError::Transport {
                channel,
                source: source.with_context(ctx),
            },
            StreamError::Config(msg) => StreamError::Config(format!("{ctx}: {msg}")),
            StreamError::Encoding(msg) => StreamError::Encoding(format!("{ctx}: {msg}")),
            StreamError::Decoding(msg) => StreamError::Decoding(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

impl From<CodecError> for StreamError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encoding(msg) => StreamError::Encoding(msg),
            CodecError::Decoding(msg) => StreamError::Decoding(msg),
            CodecError::Shape(shape) => StreamError::Decoding(shape.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_names_channel() {
        let err = StreamError::transport("insert-1", TransportError::io("connection reset"));
        assert_eq!(err.to_string(), "channel 'insert-1': connection reset");
    }

    #[test]
    fn context_reaches_inner_transport_error() {
        let err = StreamError::transport("c", TransportError::io("boom")).with_context("produce");
        match err {
            StreamError::Transport { source, .. } => assert_eq!(source.message(), "produce: boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn codec_errors_map_to_stream_taxonomy() {
        assert!(matches!(
            StreamError::from(CodecError::Encoding("x".into())),
            StreamError::Encoding(_)
        ));
        assert!(matches!(
            StreamError::from(CodecError::Shape(ShapeError::new("row_ids", 2, 1))),
            StreamError::Decoding(_)
        ));
    }
}
