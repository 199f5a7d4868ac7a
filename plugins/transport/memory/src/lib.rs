use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use msgstream_api::{
    ChannelProducer, ChannelSubscription, SubscribePosition, Transport, TransportError,
    TransportFactory, WireRecord,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryTransportConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryTransportConfig {
    /// Frames retained per channel; the oldest is evicted beyond this.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("memory transport lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ChannelLog
// ═══════════════════════════════════════════════════════════════

struct LogState {
    frames: VecDeque<Vec<WireRecord>>,
    /// Absolute offset of `frames[0]`.
    base_offset: u64,
    /// Next offset to hand out, per consumer group.
    cursors: HashMap<String, u64>,
}

impl LogState {
    fn end_offset(&self) -> u64 {
        self.base_offset + self.frames.len() as u64
    }
}

/// Ordered, bounded frame log of one channel with per-group cursors.
struct ChannelLog {
    name: String,
    max_records: usize,
    state: Mutex<LogState>,
    closed: AtomicBool,
    /// Unit signal on every append and on close.
    notify_tx: broadcast::Sender<()>,
}

impl ChannelLog {
    fn new(name: String, max_records: usize) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            name,
            max_records,
            state: Mutex::new(LogState {
                frames: VecDeque::with_capacity(max_records.min(65536)),
                base_offset: 0,
                cursors: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            notify_tx,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn append(&self, frame: Vec<WireRecord>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::closed(format!("channel '{}' is closed", self.name)));
        }
        {
            let mut state = lock(&self.state);
            if self.max_records > 0 && state.frames.len() >= self.max_records {
                state.frames.pop_front();
                state.base_offset += 1;
            }
            state.frames.push_back(frame);
        }
        // No receivers is fine.
        let _ = self.notify_tx.send(());
        Ok(())
    }

    fn join_group(&self, group: &str, position: SubscribePosition) {
        let mut state = lock(&self.state);
        let start = match position {
            SubscribePosition::Earliest => state.base_offset,
            SubscribePosition::Latest => state.end_offset(),
        };
        state.cursors.entry(group.to_string()).or_insert(start);
    }

    /// Отдать следующий frame группы и сдвинуть общий cursor: competing
    /// subscribers одной группы никогда не получают один и тот же frame.
    fn take_next(&self, group: &str) -> Option<Vec<WireRecord>> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let base = state.base_offset;
        let end = state.end_offset();
        let cursor = state.cursors.entry(group.to_string()).or_insert(base);
        if *cursor < base {
            tracing::warn!(
                channel = %self.name,
                %group,
                skipped = base - *cursor,
                "consumer group lagged behind retention, skipping evicted frames"
            );
            *cursor = base;
        }
        if *cursor >= end {
            return None;
        }
        let idx = (*cursor - base) as usize;
        *cursor += 1;
        state.frames.get(idx).cloned()
    }

    fn backlog(&self, group: &str) -> usize {
        let state = lock(&self.state);
        let cursor = state.cursors.get(group).copied().unwrap_or(state.base_offset);
        state.end_offset().saturating_sub(cursor.max(state.base_offset)) as usize
    }

    fn len(&self) -> usize {
        lock(&self.state).frames.len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.notify_tx.send(());
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransport
// ═══════════════════════════════════════════════════════════════

/// In-process transport: ordered log на каждый channel, named consumer groups
/// с competing delivery. Channel создаётся при первом обращении.
pub struct MemoryTransport {
    max_records: usize,
    channels: RwLock<HashMap<String, Arc<ChannelLog>>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("max_records", &self.max_records)
            .field("channels", &self.channel_names())
            .finish()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(default_max_records())
    }
}

impl MemoryTransport {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records,
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn read_channels(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ChannelLog>>> {
        match self.channels.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory transport channel map read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_channels(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ChannelLog>>> {
        match self.channels.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory transport channel map write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn log(&self, channel: &str) -> Arc<ChannelLog> {
        if let Some(log) = self.existing(channel) {
            return log;
        }
        self.write_channels()
            .entry(channel.to_string())
            .or_insert_with(|| {
                tracing::info!(%channel, max_records = self.max_records, "created memory channel");
                Arc::new(ChannelLog::new(channel.to_string(), self.max_records))
            })
            .clone()
    }

    fn existing(&self, channel: &str) -> Option<Arc<ChannelLog>> {
        self.read_channels().get(channel).cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.read_channels().keys().cloned().collect()
    }

    /// Frames currently retained by `channel`.
    pub fn channel_len(&self, channel: &str) -> usize {
        self.existing(channel).map_or(0, |log| log.len())
    }

    /// Retained frames `group` has not pulled from `channel` yet.
    pub fn backlog(&self, channel: &str, group: &str) -> usize {
        self.existing(channel).map_or(0, |log| log.backlog(group))
    }

    /// Закрыть все channels: send возвращает Closed, подписки завершаются.
    pub fn close(&self) {
        let guard = self.read_channels();
        for log in guard.values() {
            log.close();
        }
        tracing::info!(channels = guard.len(), "memory transport closed");
    }
}

impl Transport for MemoryTransport {
    fn create_producer(&self, channel: &str) -> Result<Box<dyn ChannelProducer>, TransportError> {
        let log = self.log(channel);
        if log.is_closed() {
            return Err(TransportError::closed(format!("channel '{channel}' is closed")));
        }
        Ok(Box::new(MemoryProducer {
            log,
            closed: AtomicBool::new(false),
        }))
    }

    fn subscribe(
        &self,
        channel: &str,
        group: &str,
        position: SubscribePosition,
    ) -> Result<Box<dyn ChannelSubscription>, TransportError> {
        if group.is_empty() {
            return Err(TransportError::config(format!(
                "channel '{channel}': subscription group must not be empty"
            )));
        }
        let log = self.log(channel);
        if log.is_closed() {
            return Err(TransportError::closed(format!("channel '{channel}' is closed")));
        }
        // Subscribe to notifications before the first read so no append is missed.
        let notify_rx = log.notify_tx.subscribe();
        log.join_group(group, position);
        Ok(Box::new(MemorySubscription {
            log,
            group: group.to_string(),
            notify_rx,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer / Subscription
// ═══════════════════════════════════════════════════════════════

pub struct MemoryProducer {
    log: Arc<ChannelLog>,
    closed: AtomicBool,
}

impl ChannelProducer for MemoryProducer {
    fn channel(&self) -> &str {
        &self.log.name
    }

    fn send(
        &self,
        records: Vec<WireRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::closed(format!(
                    "producer for channel '{}' is closed",
                    self.log.name
                )));
            }
            self.log.append(records)
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub struct MemorySubscription {
    log: Arc<ChannelLog>,
    group: String,
    notify_rx: broadcast::Receiver<()>,
}

impl ChannelSubscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.log.name
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Vec<WireRecord>>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if self.log.is_closed() {
                    return None;
                }
                if let Some(frame) = self.log.take_next(&self.group) {
                    return Some(frame);
                }
                // Lagged only means several appends happened; re-read.
                match self.notify_rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryTransportFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryTransportFactory;

impl TransportFactory for MemoryTransportFactory {
    fn create(&self, config_json: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let config: MemoryTransportConfig = if config_json.trim() == "{}" {
            MemoryTransportConfig::default()
        } else {
            serde_json::from_str(config_json)?
        };
        Ok(Arc::new(MemoryTransport::new(config.max_records)))
    }
}
