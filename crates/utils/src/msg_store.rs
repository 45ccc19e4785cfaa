use std::{
    collections::VecDeque,
    sync::{OnceLock, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::event_msg::EventMsg;

const DEFAULT_HISTORY_MAX_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_HISTORY_MAX_ENTRIES: usize = 2000;

struct HistoryConfig {
    max_bytes: usize,
    max_entries: usize,
}

static HISTORY_CONFIG: OnceLock<HistoryConfig> = OnceLock::new();

fn history_config() -> &'static HistoryConfig {
    HISTORY_CONFIG.get_or_init(|| {
        let max_bytes = read_env_usize("REME_EVENT_HISTORY_MAX_BYTES", DEFAULT_HISTORY_MAX_BYTES);
        let max_entries =
            read_env_usize("REME_EVENT_HISTORY_MAX_ENTRIES", DEFAULT_HISTORY_MAX_ENTRIES);

        HistoryConfig {
            max_bytes: normalize_limit(max_bytes, "REME_EVENT_HISTORY_MAX_BYTES"),
            max_entries: normalize_limit(max_entries, "REME_EVENT_HISTORY_MAX_ENTRIES"),
        }
    })
}

fn read_env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => match value.parse::<usize>() {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("Invalid {name}='{value}': {err}. Using default {default}.");
                default
            }
        },
        Err(_) => default,
    }
}

fn normalize_limit(value: usize, name: &str) -> usize {
    if value == 0 {
        tracing::warn!("{name} set to 0. Using minimum value 1 instead.");
        1
    } else {
        value
    }
}

struct StoredMsg {
    msg: EventMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
    finished: bool,
}

/// Broadcast hub for domain events: bounded history for late joiners plus a
/// live channel for connected clients.
pub struct MsgStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<EventMsg>,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
                finished: false,
            }),
            sender,
        }
    }

    pub fn push(&self, msg: EventMsg) {
        let _ = self.sender.send(msg.clone());
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap();
        if matches!(msg, EventMsg::Finished) {
            inner.finished = true;
        }
        inner.push_msg(msg, bytes);
    }

    pub fn push_event(&self, event_type: &str, project_id: Option<uuid::Uuid>, payload: serde_json::Value) {
        self.push(EventMsg::event(event_type, project_id, payload));
    }

    pub fn push_finished(&self) {
        self.push(EventMsg::Finished);
    }

    pub fn get_receiver(&self) -> broadcast::Receiver<EventMsg> {
        self.sender.subscribe()
    }

    pub fn get_history(&self) -> Vec<EventMsg> {
        self.inner
            .read()
            .unwrap()
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// History then live, as `EventMsg`.
    pub fn history_plus_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<EventMsg, std::io::Error>> {
        let (history, finished) = {
            let inner = self.inner.read().unwrap();
            (
                inner.history.iter().map(|s| s.msg.clone()).collect::<Vec<_>>(),
                inner.finished,
            )
        };

        let hist = futures::stream::iter(history.into_iter().map(Ok::<_, std::io::Error>));
        if finished {
            return Box::pin(hist);
        }

        let live = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|res| async move { res.ok().map(Ok::<_, std::io::Error>) });
        Box::pin(hist.chain(live))
    }
}

impl Inner {
    fn push_msg(&mut self, msg: EventMsg, bytes: usize) {
        let limits = history_config();

        while self.history.len() >= limits.max_entries
            || self.total_bytes.saturating_add(bytes) > limits.max_bytes
        {
            if let Some(front) = self.history.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        self.history.push_back(StoredMsg { msg, bytes });
        self.total_bytes = self.total_bytes.saturating_add(bytes);
    }
}
