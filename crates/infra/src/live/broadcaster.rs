//! Change broadcaster for connected display clients.
//!
//! Every connected display owns a bounded channel. Change notices are fanned
//! out with `try_send` so a slow or vanished client never blocks a writer; a
//! channel that cannot take a change frame is dropped and the client is
//! expected to reconnect. A heartbeat task checks every channel on a fixed
//! interval. A client whose buffer stays full for `max_missed_heartbeats`
//! consecutive heartbeats is reaped.
//!
//! The broadcaster keeps no history. Clients that reconnect simply refetch.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use homeboard_core::ChangeNotifier;
use homeboard_domain::{ChangeKind, ChangeNotice, LiveConfig, LiveMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Tuning for the broadcaster
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
    pub channel_capacity: usize,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self::from_config(&LiveConfig::default())
    }
}

impl LiveSettings {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            max_missed_heartbeats: config.max_missed_heartbeats.max(1),
            channel_capacity: config.channel_capacity.max(2),
        }
    }
}

/// One open push channel
struct ConnectedClient {
    sender: mpsc::Sender<LiveMessage>,
    connected_at: DateTime<Utc>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    missed_heartbeats: u32,
}

struct Inner {
    clients: DashMap<Uuid, ConnectedClient>,
    settings: LiveSettings,
}

impl Inner {
    fn disconnect(&self, client_id: &Uuid, reason: &'static str) -> bool {
        let removed = self.clients.remove(client_id).is_some();
        if removed {
            debug!(client_id = %client_id, reason, clients = self.clients.len(), "live client removed");
        }
        removed
    }
}

/// Outcome of one heartbeat round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub delivered: usize,
    pub missed: usize,
    pub reaped: usize,
}

/// Fans change notices out to every connected display
#[derive(Clone)]
pub struct LiveBroadcaster {
    inner: Arc<Inner>,
}

impl LiveBroadcaster {
    pub fn new(settings: LiveSettings) -> Self {
        Self { inner: Arc::new(Inner { clients: DashMap::new(), settings }) }
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.inner.settings
    }

    /// Open a channel for a new client. The first frame is always the
    /// `connected` acknowledgement.
    pub fn connect(&self) -> LiveSubscription {
        let client_id = Uuid::new_v4();
        let now = Utc::now();
        let (sender, receiver) = mpsc::channel(self.inner.settings.channel_capacity);

        // A fresh channel always has room for the acknowledgement
        let _ = sender.try_send(LiveMessage::Connected { client_id: client_id.to_string(), at: now });

        self.inner.clients.insert(
            client_id,
            ConnectedClient { sender, connected_at: now, last_heartbeat_at: None, missed_heartbeats: 0 },
        );
        debug!(client_id = %client_id, clients = self.inner.clients.len(), "live client connected");

        LiveSubscription { client_id, receiver, owner: Arc::downgrade(&self.inner) }
    }

    /// Remove a client; returns whether it was connected
    pub fn disconnect(&self, client_id: &Uuid) -> bool {
        self.inner.disconnect(client_id, "closed")
    }

    /// Close every channel; open streams end once their buffers drain
    pub fn disconnect_all(&self) -> usize {
        let count = self.inner.clients.len();
        self.inner.clients.clear();
        info!(clients = count, "all live clients disconnected");
        count
    }

    /// Number of open channels
    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Connection time of a client, if it is still connected
    pub fn connected_at(&self, client_id: &Uuid) -> Option<DateTime<Utc>> {
        self.inner.clients.get(client_id).map(|client| client.connected_at)
    }

    /// Time of the last heartbeat a client accepted
    pub fn last_heartbeat_at(&self, client_id: &Uuid) -> Option<DateTime<Utc>> {
        self.inner.clients.get(client_id).and_then(|client| client.last_heartbeat_at)
    }

    /// Notify every client that `entity_id` in `domain` changed
    pub fn broadcast(&self, domain: &str, kind: ChangeKind, entity_id: &str) -> usize {
        self.publish(ChangeNotice {
            domain: domain.to_string(),
            kind,
            entity_id: entity_id.to_string(),
            source_id: None,
            at: Utc::now(),
        })
    }

    /// Fan a notice out; returns the number of clients that accepted it
    pub fn publish(&self, notice: ChangeNotice) -> usize {
        let message = LiveMessage::Change(notice);
        let mut delivered = 0;
        let mut failed = Vec::new();

        for entry in self.inner.clients.iter() {
            match entry.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => failed.push((*entry.key(), "lagging")),
                Err(TrySendError::Closed(_)) => failed.push((*entry.key(), "closed")),
            }
        }

        // Removal happens after iteration so no shard lock is held twice
        for (client_id, reason) in &failed {
            self.inner.disconnect(client_id, reason);
        }

        debug!(delivered, dropped = failed.len(), "change notice broadcast");
        delivered
    }

    /// Send one heartbeat to every client and reap the unresponsive ones
    pub fn heartbeat(&self) -> HeartbeatStats {
        let now = Utc::now();
        let max_missed = self.inner.settings.max_missed_heartbeats;
        let mut stats = HeartbeatStats::default();
        let mut reap = Vec::new();

        for mut entry in self.inner.clients.iter_mut() {
            let client_id = *entry.key();
            let client = entry.value_mut();
            match client.sender.try_send(LiveMessage::Heartbeat { at: now }) {
                Ok(()) => {
                    client.missed_heartbeats = 0;
                    client.last_heartbeat_at = Some(now);
                    stats.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    client.missed_heartbeats += 1;
                    stats.missed += 1;
                    if client.missed_heartbeats >= max_missed {
                        reap.push(client_id);
                    }
                }
                Err(TrySendError::Closed(_)) => reap.push(client_id),
            }
        }

        for client_id in &reap {
            if self.inner.disconnect(client_id, "stale") {
                stats.reaped += 1;
            }
        }

        if stats.reaped > 0 {
            info!(reaped = stats.reaped, clients = self.client_count(), "reaped stale live clients");
        }
        stats
    }

    /// Run heartbeats until `cancel` fires
    pub fn spawn_heartbeat(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let broadcaster = self.clone();
        let period = self.inner.settings.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("live heartbeat cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        broadcaster.heartbeat();
                    }
                }
            }
        })
    }
}

impl ChangeNotifier for LiveBroadcaster {
    fn notify(&self, notice: ChangeNotice) {
        self.publish(notice);
    }
}

/// Receiving half of a client's channel.
///
/// Dropping the subscription disconnects the client.
pub struct LiveSubscription {
    client_id: Uuid,
    receiver: mpsc::Receiver<LiveMessage>,
    owner: Weak<Inner>,
}

impl LiveSubscription {
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Next frame; `None` once the broadcaster dropped this client
    pub async fn recv(&mut self) -> Option<LiveMessage> {
        self.receiver.recv().await
    }
}

impl Stream for LiveSubscription {
    type Item = LiveMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            inner.disconnect(&self.client_id, "dropped");
        }
    }
}
