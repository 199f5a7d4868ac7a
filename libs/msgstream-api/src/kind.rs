use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag identifying the payload schema of a message.
///
/// Drives both marshalling (which struct encodes the payload) and dispatch
/// on the consume path (which decoder rebuilds it). Embedders that define
/// their own message types use `Custom` with a code at or above
/// [`MsgKind::CUSTOM_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgKind {
    Insert,
    Delete,
    Search,
    SearchResult,
    TimeTick,
    Custom(u16),
}

impl MsgKind {
    /// First wire code available to `Custom` kinds.
    pub const CUSTOM_BASE: u16 = 1000;

    /// Stable numeric code carried next to the payload on the wire.
    pub fn code(self) -> u16 {
        match self {
            MsgKind::Insert => 400,
            MsgKind::Delete => 401,
            MsgKind::Search => 500,
            MsgKind::SearchResult => 501,
            MsgKind::TimeTick => 1200,
            MsgKind::Custom(code) => code,
        }
    }

    /// Inverse of [`MsgKind::code`]. Unknown codes below the custom range
    /// yield `None`.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            400 => Some(MsgKind::Insert),
            401 => Some(MsgKind::Delete),
            500 => Some(MsgKind::Search),
            501 => Some(MsgKind::SearchResult),
            1200 => Some(MsgKind::TimeTick),
            c if c >= Self::CUSTOM_BASE => Some(MsgKind::Custom(c)),
            _ => None,
        }
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgKind::Insert => f.write_str("insert"),
            MsgKind::Delete => f.write_str("delete"),
            MsgKind::Search => f.write_str("search"),
            MsgKind::SearchResult => f.write_str("search_result"),
            MsgKind::TimeTick => f.write_str("time_tick"),
            MsgKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}
