use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ShapeError};
use crate::kind::MsgKind;
use crate::msg::{BaseMsg, Blob, RowSplit, Timestamp, TsMsg, UniqueId, marshal_json, unmarshal_json};

/// Rows to insert into one collection partition.
///
/// `timestamps`, `row_ids` and `row_data` are parallel: index `i` in each
/// describes row `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertMsg {
    pub base: BaseMsg,
    pub req_id: UniqueId,
    pub collection_name: String,
    pub partition_tag: String,
    pub segment_id: UniqueId,
    pub channel_id: String,
    pub proxy_id: UniqueId,
    pub timestamps: Vec<Timestamp>,
    pub row_ids: Vec<UniqueId>,
    pub row_data: Vec<Blob>,
}

impl InsertMsg {
    /// Reject the message unless every per-row sequence, the envelope's
    /// hash values included, has the same length.
    pub fn validated(self) -> Result<Self, ShapeError> {
        let rows = self.row_count()?;
        self.base.validate_rows(rows)?;
        Ok(self)
    }

    pub fn decode(input: &[u8]) -> Result<Self, CodecError> {
        let msg: Self = unmarshal_json(input)?;
        Ok(msg.validated()?)
    }

    /// Decoder registered for [`MsgKind::Insert`].
    pub fn unmarshal(input: &[u8]) -> Result<Arc<dyn TsMsg>, CodecError> {
        Ok(Arc::new(Self::decode(input)?))
    }
}

impl TsMsg for InsertMsg {
    fn kind(&self) -> MsgKind {
        MsgKind::Insert
    }

    fn base(&self) -> &BaseMsg {
        &self.base
    }

    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        marshal_json(self)
    }

    fn as_rows(&self) -> Option<&dyn RowSplit> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl RowSplit for InsertMsg {
    fn row_count(&self) -> Result<usize, ShapeError> {
        let rows = self.timestamps.len();
        ShapeError::check("row_ids", rows, self.row_ids.len())?;
        ShapeError::check("row_data", rows, self.row_data.len())?;
        Ok(rows)
    }

    fn slice_rows(&self, rows: &[usize]) -> Arc<dyn TsMsg> {
        Arc::new(InsertMsg {
            base: self.base.slice(rows),
            req_id: self.req_id,
            collection_name: self.collection_name.clone(),
            partition_tag: self.partition_tag.clone(),
            segment_id: self.segment_id,
            channel_id: self.channel_id.clone(),
            proxy_id: self.proxy_id,
            timestamps: rows.iter().map(|&r| self.timestamps[r]).collect(),
            row_ids: rows.iter().map(|&r| self.row_ids[r]).collect(),
            row_data: rows.iter().map(|&r| self.row_data[r].clone()).collect(),
        })
    }
}
