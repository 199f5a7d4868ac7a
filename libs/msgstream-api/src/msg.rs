use std::any::Any;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ShapeError};
use crate::kind::MsgKind;

/// Logical time assigned by the external timestamp authority.
pub type Timestamp = u64;

/// Cluster-wide identifier (request, row, segment, node).
pub type UniqueId = i64;

/// Envelope shared by every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMsg {
    pub begin_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    /// One hash per logical row; used only for outbound partitioning.
    #[serde(default)]
    pub hash_values: Vec<u32>,
}

impl BaseMsg {
    pub fn new(begin_timestamp: Timestamp, end_timestamp: Timestamp, hash_values: Vec<u32>) -> Self {
        Self {
            begin_timestamp,
            end_timestamp,
            hash_values,
        }
    }

    /// Envelope for a message that carries a single unit of work.
    pub fn single(ts: Timestamp, hash_value: u32) -> Self {
        Self::new(ts, ts, vec![hash_value])
    }

    /// Check that the envelope carries exactly `rows` hash values.
    pub fn validate_rows(&self, rows: usize) -> Result<(), ShapeError> {
        ShapeError::check("hash_values", rows, self.hash_values.len())
    }

    /// Envelope of a slice: same time range, hash values picked by row index.
    ///
    /// `rows` must be in range; check with `validate_rows` first.
    pub fn slice(&self, rows: &[usize]) -> Self {
        Self {
            begin_timestamp: self.begin_timestamp,
            end_timestamp: self.end_timestamp,
            hash_values: rows.iter().map(|&r| self.hash_values[r]).collect(),
        }
    }
}

/// Opaque row payload. Base64 on the wire.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

impl Serialize for Blob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Blob)
            .map_err(serde::de::Error::custom)
    }
}

/// A typed, immutable message.
///
/// Every variant exposes its kind, its envelope and a way to marshal itself.
/// The inverse (bytes → message) is a per-kind free function registered in
/// the consumer's dispatcher, so the set of kinds stays open.
pub trait TsMsg: Send + Sync + fmt::Debug {
    fn kind(&self) -> MsgKind;

    fn base(&self) -> &BaseMsg;

    fn marshal(&self) -> Result<Vec<u8>, CodecError>;

    /// Row-level access for kinds that carry parallel per-row sequences.
    /// `None` means the message can only be routed as a whole.
    fn as_rows(&self) -> Option<&dyn RowSplit> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn begin_ts(&self) -> Timestamp {
        self.base().begin_timestamp
    }

    fn end_ts(&self) -> Timestamp {
        self.base().end_timestamp
    }
}

/// Capability of messages made of parallel per-row sequences where index
/// `i` across all sequences describes one logical row.
pub trait RowSplit {
    /// Number of rows, or the first sequence whose length disagrees.
    fn row_count(&self) -> Result<usize, ShapeError>;

    /// New message of the same kind holding only `rows`, in the given order.
    /// Non-row fields are copied unchanged.
    ///
    /// Callers must have validated `row_count()` and pass in-range indices.
    fn slice_rows(&self, rows: &[usize]) -> Arc<dyn TsMsg>;
}

/// Downcast helper for consumers that know which kind they expect.
pub fn downcast<T: 'static>(msg: &dyn TsMsg) -> Option<&T> {
    msg.as_any().downcast_ref::<T>()
}

pub(crate) fn marshal_json<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(msg).map_err(|e| CodecError::Encoding(e.to_string()))
}

pub(crate) fn unmarshal_json<T: DeserializeOwned>(input: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(input).map_err(|e| CodecError::Decoding(e.to_string()))
}

/// Ordered group of messages delivered as one unit to one destination.
///
/// The time range is the union of the members' ranges.
#[derive(Clone, Default)]
pub struct MsgPack {
    begin_ts: Timestamp,
    end_ts: Timestamp,
    msgs: Vec<Arc<dyn TsMsg>>,
}

impl MsgPack {
    pub fn new(msgs: Vec<Arc<dyn TsMsg>>) -> Self {
        let begin_ts = msgs.iter().map(|m| m.begin_ts()).min().unwrap_or_default();
        let end_ts = msgs.iter().map(|m| m.end_ts()).max().unwrap_or_default();
        Self { begin_ts, end_ts, msgs }
    }

    /// Append a message, widening the time range.
    pub fn push(&mut self, msg: Arc<dyn TsMsg>) {
        if self.msgs.is_empty() {
            self.begin_ts = msg.begin_ts();
            self.end_ts = msg.end_ts();
        } else {
            self.begin_ts = self.begin_ts.min(msg.begin_ts());
            self.end_ts = self.end_ts.max(msg.end_ts());
        }
        self.msgs.push(msg);
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    pub fn end_ts(&self) -> Timestamp {
        self.end_ts
    }

    pub fn msgs(&self) -> &[Arc<dyn TsMsg>] {
        &self.msgs
    }

    pub fn into_msgs(self) -> Vec<Arc<dyn TsMsg>> {
        self.msgs
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }
}

impl fmt::Debug for MsgPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgPack")
            .field("begin_ts", &self.begin_ts)
            .field("end_ts", &self.end_ts)
            .field("msgs", &self.msgs)
            .finish()
    }
}

impl FromIterator<Arc<dyn TsMsg>> for MsgPack {
    fn from_iter<I: IntoIterator<Item = Arc<dyn TsMsg>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
