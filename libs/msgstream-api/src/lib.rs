pub mod delete;
pub mod error;
pub mod insert;
pub mod kind;
pub mod msg;
pub mod search;
pub mod time_tick;
pub mod transport;

pub use delete::DeleteMsg;
pub use error::{CodecError, ShapeError, TransportError, TransportErrorKind};
pub use insert::InsertMsg;
pub use kind::MsgKind;
pub use msg::{BaseMsg, Blob, MsgPack, RowSplit, Timestamp, TsMsg, UniqueId, downcast};
pub use search::{SearchMsg, SearchResultMsg};
pub use time_tick::TimeTickMsg;
pub use transport::{
    ChannelProducer, ChannelSubscription, SubscribePosition, Transport, TransportFactory,
    WireRecord,
};
