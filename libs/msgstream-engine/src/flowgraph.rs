//! Boundary between a message stream and flow-graph stages.
//!
//! A stage is invoked with the units produced by its upstream node. Stages
//! fed by a stream expect exactly one `FlowMsg::Stream` unit per call.

use std::any::Any;
use std::sync::Arc;

use msgstream_api::MsgPack;

use crate::error::StreamError;
use crate::stream::MsgStream;

/// Unit of work passed between flow-graph nodes.
pub enum FlowMsg {
    /// A batch delivered by a message stream.
    Stream(MsgPack),
    /// Anything else a graph may carry between its own nodes.
    Custom {
        name: &'static str,
        payload: Box<dyn Any + Send>,
    },
}

impl FlowMsg {
    pub fn name(&self) -> &'static str {
        match self {
            FlowMsg::Stream(_) => "stream",
            FlowMsg::Custom { name, .. } => name,
        }
    }
}

impl std::fmt::Debug for FlowMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowMsg::Stream(pack) => f.debug_tuple("Stream").field(pack).finish(),
            FlowMsg::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("expected a single input unit, got {0}")]
    InputCount(usize),

    #[error("unrecognized input unit '{0}'")]
    UnexpectedInput(&'static str),
}

/// Check a stream-fed stage's input.
///
/// No units, or one empty batch, is `Ok(None)`: the stage has nothing to do.
pub fn expect_single_stream(input: Vec<FlowMsg>) -> Result<Option<MsgPack>, StageError> {
    let count = input.len();
    let mut units = input.into_iter();
    let (Some(unit), None) = (units.next(), units.next()) else {
        return if count == 0 {
            Ok(None)
        } else {
            Err(StageError::InputCount(count))
        };
    };
    match unit {
        FlowMsg::Stream(pack) if pack.is_empty() => Ok(None),
        FlowMsg::Stream(pack) => Ok(Some(pack)),
        other => {
            tracing::warn!(unit = other.name(), "stage rejected unrecognized input");
            Err(StageError::UnexpectedInput(other.name()))
        }
    }
}

/// Source node of a flow graph: each call yields the stream's next batch.
#[derive(Debug, Clone)]
pub struct InputNode {
    name: String,
    stream: Arc<MsgStream>,
}

impl InputNode {
    pub fn new(name: impl Into<String>, stream: Arc<MsgStream>) -> Self {
        Self {
            name: name.into(),
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next batch and wrap it as the node's single output unit.
    pub async fn operate(&self) -> Result<Vec<FlowMsg>, StreamError> {
        let pack = self.stream.consume().await?;
        Ok(vec![FlowMsg::Stream(pack)])
    }
}
