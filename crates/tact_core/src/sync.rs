//! Best-effort "state changed" signal between instances on one device.
//!
//! A [`SyncHub`] is the shared channel; each instance holds a [`SyncBus`]
//! endpoint handed out by the hub, or [`SyncBus::Unavailable`] when there is
//! no channel at all. Nothing but a refresh request ever travels, so a lost
//! or lagged message only means a peer re-reads later than it could have.
//!
//! Hubs opened with [`SyncHub::on_device`] also relay through a signal file
//! in the data directory. Every send replaces the file; a hub that called
//! [`SyncHub::watch_device`] polls it and feeds other processes' messages to
//! its local endpoints.

use crate::error::AppError;
use ::notify::{Config as WatchConfig, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;
pub const SIGNAL_FILE_NAME: &str = "tact.sync";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Messages relayed from another process; local endpoints start at 1.
const DEVICE_ORIGIN: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    Refresh,
}

impl SyncMessage {
    pub fn encode(&self) -> String {
        match serde_json::to_string(self) {
            Ok(text) => text,
            Err(_) => String::from(r#"{"type":"refresh"}"#),
        }
    }

    /// Anything that is not a known message shape yields `None`.
    pub fn decode(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceSignal {
    source: String,
    seq: u64,
    payload: String,
}

struct DeviceRelay {
    path: PathBuf,
    /// Tells this process's own writes apart from its peers'.
    token: String,
    seq: AtomicU64,
}

impl DeviceRelay {
    fn publish(&self, payload: &str) -> Result<(), AppError> {
        let signal = DeviceSignal {
            source: self.token.clone(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            payload: payload.to_string(),
        };
        let content = serde_json::to_vec(&signal)?;
        let parent = self.path.parent().unwrap_or(Path::new("."));
        let mut staged =
            tempfile::NamedTempFile::new_in(parent).map_err(|err| AppError::io(err.to_string()))?;
        staged
            .write_all(&content)
            .map_err(|err| AppError::io(err.to_string()))?;
        staged
            .persist(&self.path)
            .map_err(|err| AppError::io(err.error.to_string()))?;
        Ok(())
    }
}

fn read_signal(path: &Path) -> Option<DeviceSignal> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

pub struct SyncHub {
    tx: broadcast::Sender<Envelope>,
    next_origin: AtomicU64,
    relay: Option<Arc<DeviceRelay>>,
    watcher: Mutex<Option<PollWatcher>>,
}

impl SyncHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self::build(capacity, None))
    }

    /// A hub whose endpoints also reach other processes sharing `dir`.
    pub fn on_device(dir: &Path) -> Result<Arc<Self>, AppError> {
        std::fs::create_dir_all(dir).map_err(|err| AppError::io(err.to_string()))?;
        let path = dir.join(SIGNAL_FILE_NAME);
        if !path.exists() {
            std::fs::write(&path, "").map_err(|err| AppError::io(err.to_string()))?;
        }

        let relay = DeviceRelay {
            path,
            token: Uuid::new_v4().to_string(),
            seq: AtomicU64::new(1),
        };
        Ok(Arc::new(Self::build(DEFAULT_CAPACITY, Some(Arc::new(relay)))))
    }

    fn build(capacity: usize, relay: Option<Arc<DeviceRelay>>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_origin: AtomicU64::new(1),
            relay,
            watcher: Mutex::new(None),
        }
    }

    /// A new instance endpoint. Endpoints never hear their own messages.
    pub fn endpoint(&self) -> SyncBus {
        let origin = self.next_origin.fetch_add(1, Ordering::Relaxed);
        SyncBus::Channel(SyncChannel {
            origin,
            tx: self.tx.clone(),
            relay: self.relay.clone(),
        })
    }

    /// Start delivering other processes' messages to this hub's endpoints.
    /// Watching stops when the hub is dropped.
    pub fn watch_device(&self) -> Result<(), AppError> {
        let Some(relay) = &self.relay else {
            return Err(AppError::SyncUnavailable(
                "hub is not attached to a device".to_string(),
            ));
        };
        let mut slot = self
            .watcher
            .lock()
            .map_err(|_| AppError::SyncUnavailable("watcher lock poisoned".to_string()))?;
        if slot.is_some() {
            return Ok(());
        }

        let tx = self.tx.clone();
        let path = relay.path.clone();
        let token = relay.token.clone();
        let handler = move |result: ::notify::Result<::notify::Event>| match result {
            Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                let Some(signal) = read_signal(&path) else {
                    return;
                };
                if signal.source == token {
                    return;
                }
                debug!(seq = signal.seq, "sync message relayed from another process");
                let _ = tx.send(Envelope {
                    origin: DEVICE_ORIGIN,
                    payload: signal.payload,
                });
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "device sync watch failed"),
        };

        let config = WatchConfig::default()
            .with_poll_interval(POLL_INTERVAL)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(handler, config)
            .map_err(|err| AppError::SyncUnavailable(err.to_string()))?;
        watcher
            .watch(&relay.path, RecursiveMode::NonRecursive)
            .map_err(|err| AppError::SyncUnavailable(err.to_string()))?;
        *slot = Some(watcher);
        debug!(path = %relay.path.display(), "watching device sync signal");
        Ok(())
    }
}

#[derive(Clone)]
pub struct SyncChannel {
    origin: u64,
    tx: broadcast::Sender<Envelope>,
    relay: Option<Arc<DeviceRelay>>,
}

#[derive(Clone)]
pub enum SyncBus {
    Channel(SyncChannel),
    Unavailable,
}

impl SyncBus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// Fire and forget. Returns how many peers were listening.
    pub fn notify(&self, message: SyncMessage) -> usize {
        self.notify_text(message.encode())
    }

    pub fn refresh(&self) -> usize {
        self.notify(SyncMessage::Refresh)
    }

    /// Broadcast raw text; receivers drop anything that does not decode.
    ///
    /// The count covers local peers only; other processes are not counted.
    pub fn notify_text(&self, payload: impl Into<String>) -> usize {
        match self {
            Self::Channel(channel) => {
                let payload = payload.into();
                if let Some(relay) = &channel.relay
                    && let Err(err) = relay.publish(&payload)
                {
                    warn!(%err, "device sync signal not written");
                }
                let envelope = Envelope {
                    origin: channel.origin,
                    payload,
                };
                let delivered = channel.tx.send(envelope).unwrap_or(0);
                debug!(delivered, "sync message sent");
                delivered
            }
            Self::Unavailable => 0,
        }
    }

    pub fn subscribe(&self) -> Result<SyncSubscription, AppError> {
        match self {
            Self::Channel(channel) => Ok(SyncSubscription {
                origin: channel.origin,
                rx: channel.tx.subscribe(),
            }),
            Self::Unavailable => Err(AppError::SyncUnavailable(
                "no cross-instance channel".to_string(),
            )),
        }
    }

    /// Run `handler` for every peer message on a background task.
    ///
    /// Returns `None` when there is no channel or no runtime to listen on.
    /// Listening stops when the returned handle is dropped.
    pub fn on_notify<F>(&self, handler: F) -> Option<SyncListener>
    where
        F: Fn(SyncMessage) + Send + 'static,
    {
        let mut subscription = self.subscribe().ok()?;
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let task = runtime.spawn(async move {
            while let Some(message) = subscription.recv().await {
                handler(message);
            }
        });
        Some(SyncListener { task })
    }
}

pub struct SyncSubscription {
    origin: u64,
    rx: broadcast::Receiver<Envelope>,
}

impl SyncSubscription {
    /// Next message from a peer, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<SyncMessage> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.origin == self.origin => continue,
                Ok(envelope) => match SyncMessage::decode(&envelope.payload) {
                    Some(message) => return Some(message),
                    None => warn!(payload = %envelope.payload, "ignoring unknown sync message"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "sync receiver lagged");
                    return Some(SyncMessage::Refresh);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct SyncListener {
    task: JoinHandle<()>,
}

impl Drop for SyncListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::{SIGNAL_FILE_NAME, SyncBus, SyncHub, SyncMessage};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn refresh_message_wire_shape() {
        assert_eq!(SyncMessage::Refresh.encode(), r#"{"type":"refresh"}"#);
        assert_eq!(
            SyncMessage::decode(r#"{"type":"refresh"}"#),
            Some(SyncMessage::Refresh)
        );
        assert_eq!(SyncMessage::decode(r#"{"type":"delta"}"#), None);
        assert_eq!(SyncMessage::decode("refresh"), None);
    }

    #[tokio::test]
    async fn peers_receive_but_sender_does_not() {
        let hub = SyncHub::new();
        let first = hub.endpoint();
        let second = hub.endpoint();
        let mut own = first.subscribe().unwrap();
        let mut peer = second.subscribe().unwrap();

        assert_eq!(first.refresh(), 2);

        assert_eq!(peer.recv().await, Some(SyncMessage::Refresh));
        let echoed = timeout(Duration::from_millis(50), own.recv()).await;
        assert!(echoed.is_err());
    }

    #[tokio::test]
    async fn unknown_shapes_are_skipped() {
        let hub = SyncHub::new();
        let sender = hub.endpoint();
        let mut peer = hub.endpoint().subscribe().unwrap();

        sender.notify_text(r#"{"type":"patch","id":"t1"}"#);
        sender.refresh();

        assert_eq!(peer.recv().await, Some(SyncMessage::Refresh));
    }

    #[tokio::test]
    async fn lagged_receiver_is_told_to_refresh() {
        let hub = SyncHub::with_capacity(1);
        let sender = hub.endpoint();
        let mut peer = hub.endpoint().subscribe().unwrap();

        sender.notify_text("garbage");
        sender.notify_text("garbage");
        sender.notify_text("garbage");

        assert_eq!(peer.recv().await, Some(SyncMessage::Refresh));
    }

    #[tokio::test]
    async fn unavailable_bus_degrades_to_no_op() {
        let bus = SyncBus::Unavailable;
        assert!(!bus.is_available());
        assert_eq!(bus.refresh(), 0);
        assert_eq!(bus.subscribe().err().unwrap().code(), "sync_unavailable");
        assert!(bus.on_notify(|_| {}).is_none());
    }

    #[tokio::test]
    async fn on_notify_runs_handler_until_dropped() {
        let hub = SyncHub::new();
        let sender = hub.endpoint();
        let listener_bus = hub.endpoint();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let listener = listener_bus
            .on_notify(move |message| {
                let _ = tx.send(message);
            })
            .unwrap();

        sender.refresh();
        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some(SyncMessage::Refresh));

        drop(listener);
        tokio::task::yield_now().await;
        sender.refresh();
        let after_drop = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(after_drop, None);
    }

    #[tokio::test]
    async fn processes_on_one_device_hear_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let writer_hub = SyncHub::on_device(dir.path()).unwrap();
        let reader_hub = SyncHub::on_device(dir.path()).unwrap();
        reader_hub.watch_device().unwrap();
        let mut peer = reader_hub.endpoint().subscribe().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        writer_hub.endpoint().refresh();

        let received = timeout(Duration::from_secs(3), peer.recv()).await.unwrap();
        assert_eq!(received, Some(SyncMessage::Refresh));
        assert!(dir.path().join(SIGNAL_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn device_watch_skips_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let hub = SyncHub::on_device(dir.path()).unwrap();
        hub.watch_device().unwrap();
        let sender = hub.endpoint();
        let mut own = sender.subscribe().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        sender.refresh();

        let echoed = timeout(Duration::from_millis(800), own.recv()).await;
        assert!(echoed.is_err());
    }

    #[test]
    fn process_local_hub_cannot_watch_device() {
        let hub = SyncHub::new();
        assert_eq!(hub.watch_device().err().unwrap().code(), "sync_unavailable");
    }
}
