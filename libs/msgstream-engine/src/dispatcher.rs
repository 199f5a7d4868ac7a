use std::collections::HashMap;
use std::sync::Arc;

use msgstream_api::{
    CodecError, DeleteMsg, InsertMsg, MsgKind, SearchMsg, SearchResultMsg, TimeTickMsg, TsMsg,
};

use crate::error::StreamError;

/// Decoder for one message kind: raw payload → typed message.
pub type UnmarshalFn = Arc<dyn Fn(&[u8]) -> Result<Arc<dyn TsMsg>, CodecError> + Send + Sync>;

/// Registry from message kind to its decoder.
///
/// Filled during setup, then shared read-only (`Arc<UnmarshalDispatcher>`)
/// by every pull task of a consumer set.
#[derive(Clone, Default)]
pub struct UnmarshalDispatcher {
    decoders: HashMap<MsgKind, UnmarshalFn>,
}

impl std::fmt::Debug for UnmarshalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnmarshalDispatcher")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl UnmarshalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with decoders for every built-in kind.
    pub fn with_builtin_kinds() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(MsgKind::Insert, InsertMsg::unmarshal);
        dispatcher.register(MsgKind::Delete, DeleteMsg::unmarshal);
        dispatcher.register(MsgKind::Search, SearchMsg::unmarshal);
        dispatcher.register(MsgKind::SearchResult, SearchResultMsg::unmarshal);
        dispatcher.register(MsgKind::TimeTick, TimeTickMsg::unmarshal);
        dispatcher
    }

    /// Install the decoder for `kind`. Registering a kind again replaces the
    /// previous decoder (last write wins).
    pub fn register<F>(&mut self, kind: MsgKind, decode: F)
    where
        F: Fn(&[u8]) -> Result<Arc<dyn TsMsg>, CodecError> + Send + Sync + 'static,
    {
        if self.decoders.insert(kind, Arc::new(decode)).is_some() {
            tracing::warn!(%kind, "decoder re-registered, previous one replaced");
        }
    }

    pub fn contains(&self, kind: MsgKind) -> bool {
        self.decoders.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<MsgKind> {
        let mut kinds: Vec<MsgKind> = self.decoders.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Decode `payload` with the decoder registered for `kind`.
    pub fn dispatch(&self, kind: MsgKind, payload: &[u8]) -> Result<Arc<dyn TsMsg>, StreamError> {
        let decode = self.decoders.get(&kind).ok_or(StreamError::UnknownKind(kind))?;
        Ok(decode(payload)?)
    }
}
