use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ShapeError};
use crate::kind::MsgKind;
use crate::msg::{BaseMsg, RowSplit, Timestamp, TsMsg, UniqueId, marshal_json, unmarshal_json};

/// Delete rows by primary key. `timestamps[i]` is the delete time of
/// `primary_keys[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMsg {
    pub base: BaseMsg,
    pub req_id: UniqueId,
    pub collection_name: String,
    pub channel_id: String,
    pub proxy_id: UniqueId,
    pub timestamps: Vec<Timestamp>,
    pub primary_keys: Vec<UniqueId>,
}

impl DeleteMsg {
    pub fn validated(self) -> Result<Self, ShapeError> {
        let rows = self.row_count()?;
        self.base.validate_rows(rows)?;
        Ok(self)
    }

    pub fn decode(input: &[u8]) -> Result<Self, CodecError> {
        let msg: Self = unmarshal_json(input)?;
        Ok(msg.validated()?)
    }

    pub fn unmarshal(input: &[u8]) -> Result<Arc<dyn TsMsg>, CodecError> {
        Ok(Arc::new(Self::decode(input)?))
    }
}

impl TsMsg for DeleteMsg {
    fn kind(&self) -> MsgKind {
        MsgKind::Delete
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

impl RowSplit for DeleteMsg {
    fn row_count(&self) -> Result<usize, ShapeError> {
        let rows = self.timestamps.len();
        ShapeError::check("primary_keys", rows, self.primary_keys.len())?;
        Ok(rows)
    }

    fn slice_rows(&self, rows: &[usize]) -> Arc<dyn TsMsg> {
        Arc::new(DeleteMsg {
            base: self.base.slice(rows),
            req_id: self.req_id,
            collection_name: self.collection_name.clone(),
            channel_id: self.channel_id.clone(),
            proxy_id: self.proxy_id,
            timestamps: rows.iter().map(|&r| self.timestamps[r]).collect(),
            primary_keys: rows.iter().map(|&r| self.primary_keys[r]).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::downcast;

    #[test]
    fn round_trip_and_slice() {
        let msg = DeleteMsg {
            base: BaseMsg::new(4, 5, vec![1, 2]),
            req_id: 9,
            collection_name: "books".into(),
            channel_id: "delete-1".into(),
            proxy_id: 1,
            timestamps: vec![4, 5],
            primary_keys: vec![42, 43],
        }
        .validated()
        .unwrap();

        let back = DeleteMsg::unmarshal(&msg.marshal().unwrap()).unwrap();
        assert_eq!(downcast::<DeleteMsg>(back.as_ref()), Some(&msg));

        let one = msg.slice_rows(&[1]);
        let one = downcast::<DeleteMsg>(one.as_ref()).unwrap();
        assert_eq!(one.primary_keys, vec![43]);
        assert_eq!(one.timestamps, vec![5]);
        assert_eq!(one.channel_id, "delete-1");
    }

    #[test]
    fn missing_primary_key_is_a_shape_error() {
        let msg = DeleteMsg {
            timestamps: vec![1, 2],
            primary_keys: vec![7],
            ..Default::default()
        };
        assert_eq!(msg.row_count().unwrap_err(), ShapeError::new("primary_keys", 2, 1));
    }
}
