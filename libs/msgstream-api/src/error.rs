use std::fmt;

/// Parallel per-row sequences of a message disagree in length.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} has {actual} rows, expected {expected}")]
pub struct ShapeError {
    pub field: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl ShapeError {
    pub fn new(field: &'static str, expected: usize, actual: usize) -> Self {
        Self { field, expected, actual }
    }

    /// `Ok(())` when `actual == expected`.
    pub fn check(field: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::new(field, expected, actual))
        }
    }
}

/// Failure to turn a message into bytes or back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("encoding: {0}")]
    Encoding(String),

    #[error("decoding: {0}")]
    Decoding(String),

    #[error("invalid shape: {0}")]
    Shape(#[from] ShapeError),
}

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The binding or the whole transport was closed.
    Closed,
    /// Channel or group does not exist and the transport won't create it.
    NotFound,
    /// Network or storage failure. The caller decides whether to retry.
    Io,
    /// Invalid transport configuration.
    Config,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Closed => f.write_str("closed"),
            TransportErrorKind::NotFound => f.write_str("not found"),
            TransportErrorKind::Io => f.write_str("io"),
            TransportErrorKind::Config => f.write_str("config"),
        }
    }
}

/// Error returned at the transport boundary (publish, subscribe, create).
///
/// Carries a kind so the coordinator can report it verbatim while callers
/// still branch on the category.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn closed(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Closed, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::NotFound, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Io, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Config, message: msg.into() }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with `ctx`, keeping the kind.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::config(e.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = TransportError::io("broker unreachable").with_context("channel 'insert-0'");
        assert_eq!(err.kind(), TransportErrorKind::Io);
        assert_eq!(err.to_string(), "channel 'insert-0': broker unreachable");
    }

    #[test]
    fn shape_check() {
        assert!(ShapeError::check("row_ids", 3, 3).is_ok());
        let err = ShapeError::check("row_ids", 3, 2).unwrap_err();
        assert_eq!(err.to_string(), "row_ids has 2 rows, expected 3");
    }
}
