use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use msgstream_api::{ChannelSubscription, MsgPack, SubscribePosition, Transport, WireRecord};

use crate::dispatcher::UnmarshalDispatcher;
use crate::error::StreamError;
use crate::lock;

// ═══════════════════════════════════════════════════════════════
//  ConsumerSet
// ═══════════════════════════════════════════════════════════════

/// Subscriptions opened by `subscribe` and not yet handed to pull tasks.
struct Pending {
    subscriptions: Vec<Box<dyn ChannelSubscription>>,
    tx: mpsc::Sender<MsgPack>,
}

/// Inbound сторона stream'а: одна subscription на channel под общим
/// group name, один pull task на subscription. Все задачи пишут в один
/// bounded delivery buffer, который читает `consume`.
pub struct ConsumerSet {
    group: String,
    channels: Vec<String>,
    pending: Mutex<Option<Pending>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<MsgPack>>,
    dispatcher: Arc<UnmarshalDispatcher>,
    dropped: Arc<AtomicU64>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConsumerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSet")
            .field("group", &self.group)
            .field("channels", &self.channels)
            .field("dropped", &self.dropped_records())
            .finish()
    }
}

impl ConsumerSet {
    /// Open a subscription on every channel under `group`. Nothing is pulled
    /// until `start`.
    ///
    /// `buffer` is the delivery buffer capacity, in batches.
    pub fn subscribe(
        transport: &dyn Transport,
        channels: &[String],
        group: &str,
        dispatcher: Arc<UnmarshalDispatcher>,
        buffer: usize,
        position: SubscribePosition,
    ) -> Result<Self, StreamError> {
        if buffer == 0 {
            return Err(StreamError::Config("receive buffer must be greater than 0".into()));
        }
        let mut subscriptions = Vec::with_capacity(channels.len());
        for channel in channels {
            let sub = transport
                .subscribe(channel, group, position)
                .map_err(|e| StreamError::transport(channel.as_str(), e))?;
            tracing::info!(%channel, %group, "consumer subscribed");
            subscriptions.push(sub);
        }
        let (tx, rx) = mpsc::channel(buffer);
        Ok(Self {
            group: group.to_string(),
            channels: channels.to_vec(),
            pending: Mutex::new(Some(Pending { subscriptions, tx })),
            rx: tokio::sync::Mutex::new(rx),
            dispatcher,
            dropped: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Spawn the pull tasks on the current tokio runtime. A second call is
    /// a no-op. Without a runtime nothing is spawned and the set stays
    /// startable.
    pub fn start(&self) -> Result<(), StreamError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::Runtime(e.to_string()))?;
        let Some(pending) = lock(&self.pending).take() else {
            return Ok(());
        };
        let mut handles = lock(&self.handles);
        for sub in pending.subscriptions {
            handles.push(runtime.spawn(pull_loop(
                sub,
                pending.tx.clone(),
                self.dispatcher.clone(),
                self.dropped.clone(),
                self.token.clone(),
            )));
        }
        tracing::info!(group = %self.group, tasks = handles.len(), "consumer started");
        Ok(())
    }

    fn is_started(&self) -> bool {
        lock(&self.pending).is_none()
    }

    /// Next delivered batch. Waits until one is buffered, or fails with
    /// `Closed` once the set is closed or every subscription has ended.
    pub async fn consume(&self) -> Result<MsgPack, StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Closed);
        }
        if !self.is_started() {
            return Err(StreamError::NotStarted);
        }
        let mut rx = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(StreamError::Closed),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StreamError::Closed),
            pack = rx.recv() => pack.ok_or(StreamError::Closed),
        }
    }

    /// Records dropped so far because they could not be decoded.
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop every pull task and wait for them. Pending and later `consume`
    /// calls fail with `Closed`.
    pub async fn close(&self) {
        self.token.cancel();
        lock(&self.pending).take();
        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!(group = %self.group, "consumer closed");
    }
}

impl Drop for ConsumerSet {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pull task
// ═══════════════════════════════════════════════════════════════

async fn pull_loop(
    mut sub: Box<dyn ChannelSubscription>,
    tx: mpsc::Sender<MsgPack>,
    dispatcher: Arc<UnmarshalDispatcher>,
    dropped: Arc<AtomicU64>,
    token: CancellationToken,
) {
    let channel = sub.channel().to_string();
    let group = sub.group().to_string();
    loop {
        let frame = tokio::select! {
            frame = sub.recv() => frame,
            _ = token.cancelled() => break,
        };
        let Some(frame) = frame else {
            if !token.is_cancelled() {
                tracing::error!(%channel, %group, "subscription ended by transport");
            }
            break;
        };
        let pack = decode_frame(&channel, frame, &dispatcher, &dropped);
        if pack.is_empty() {
            continue;
        }
        // Waiting for buffer space is the backpressure point.
        tokio::select! {
            sent = tx.send(pack) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = token.cancelled() => break,
        }
    }
    tracing::info!(%channel, %group, "pull task stopped");
}

/// Декодировать transport frame в batch. Record, который не декодируется,
/// логируется, учитывается в счётчике и пропускается.
fn decode_frame(
    channel: &str,
    frame: Vec<WireRecord>,
    dispatcher: &UnmarshalDispatcher,
    dropped: &AtomicU64,
) -> MsgPack {
    let mut pack = MsgPack::default();
    for record in frame {
        match dispatcher.dispatch(record.kind, &record.payload) {
            Ok(msg) => pack.push(msg),
            Err(e) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%channel, kind = %record.kind, error = %e, "record dropped");
            }
        }
    }
    pack
}
