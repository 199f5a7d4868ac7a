pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod flowgraph;
pub mod producer;
pub mod repack;
pub mod stream;

pub use config::StreamConfig;
pub use consumer::ConsumerSet;
pub use dispatcher::{UnmarshalDispatcher, UnmarshalFn};
pub use error::StreamError;
pub use flowgraph::{FlowMsg, InputNode, StageError, expect_single_stream};
pub use producer::{ProducerSet, encode_pack};
pub use repack::{RepackFn, by_message, by_row, default_repack};
pub use stream::{MsgStream, StreamState};

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("stream lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
