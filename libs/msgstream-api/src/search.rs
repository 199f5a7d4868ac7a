use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::kind::MsgKind;
use crate::msg::{BaseMsg, Blob, Timestamp, TsMsg, UniqueId, marshal_json, unmarshal_json};

/// A search request. Routed as a whole; the query blob is opaque here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMsg {
    pub base: BaseMsg,
    pub req_id: UniqueId,
    pub proxy_id: UniqueId,
    pub timestamp: Timestamp,
    pub result_channel_id: String,
    pub query: Blob,
}

impl SearchMsg {
    pub fn unmarshal(input: &[u8]) -> Result<Arc<dyn TsMsg>, CodecError> {
        Ok(Arc::new(unmarshal_json::<Self>(input)?))
    }
}

impl TsMsg for SearchMsg {
    fn kind(&self) -> MsgKind {
        MsgKind::Search
    }

    fn base(&self) -> &BaseMsg {
        &self.base
    }

    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        marshal_json(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Partial search result produced by one query node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultMsg {
    pub base: BaseMsg,
    pub req_id: UniqueId,
    pub proxy_id: UniqueId,
    pub query_node_id: UniqueId,
    pub timestamp: Timestamp,
    pub result_channel_id: String,
    pub hits: Vec<Blob>,
}

impl SearchResultMsg {
    pub fn unmarshal(input: &[u8]) -> Result<Arc<dyn TsMsg>, CodecError> {
        Ok(Arc::new(unmarshal_json::<Self>(input)?))
    }
}

impl TsMsg for SearchResultMsg {
    fn kind(&self) -> MsgKind {
        MsgKind::SearchResult
    }

    fn base(&self) -> &BaseMsg {
        &self.base
    }

    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        marshal_json(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
