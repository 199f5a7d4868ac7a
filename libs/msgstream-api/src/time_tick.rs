use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::kind::MsgKind;
use crate::msg::{BaseMsg, Timestamp, TsMsg, UniqueId, marshal_json, unmarshal_json};

/// Watermark: `source_id` will publish nothing older than `timestamp`.
/// Normally broadcast to every channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTickMsg {
    pub base: BaseMsg,
    pub source_id: UniqueId,
    pub timestamp: Timestamp,
}

impl TimeTickMsg {
    pub fn new(source_id: UniqueId, timestamp: Timestamp) -> Self {
        Self {
            base: BaseMsg::single(timestamp, 0),
            source_id,
            timestamp,
        }
    }

    pub fn unmarshal(input: &[u8]) -> Result<Arc<dyn TsMsg>, CodecError> {
        Ok(Arc::new(unmarshal_json::<Self>(input)?))
    }
}

impl TsMsg for TimeTickMsg {
    fn kind(&self) -> MsgKind {
        MsgKind::TimeTick
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
