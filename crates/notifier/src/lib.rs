//! Live notification delivery to connected clients.
//!
//! The [`ConnectionHub`] keeps, per user, the bounded queues of every open
//! real-time connection (one per browser tab, device, ...). Pushing never
//! waits on a consumer: a full queue drops the payload for that connection,
//! a closed one is pruned, and a user with no connection is a no-op.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use casedesk_common::types::LivePayload;
use casedesk_engine::delivery::{DeliveryOutcome, LiveDelivery};

/// Default queue size of a single connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
struct Subscriber {
    connection_id: Uuid,
    sender: mpsc::Sender<LivePayload>,
}

/// Registry of live connections keyed by user ID.
#[derive(Debug)]
pub struct ConnectionHub {
    connections: DashMap<i64, Vec<Subscriber>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Open a connection for `user_id`. The connection is unregistered when
    /// the returned subscription is dropped.
    pub fn subscribe(self: &Arc<Self>, user_id: i64) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection_id = Uuid::new_v4();

        self.connections.entry(user_id).or_default().push(Subscriber {
            connection_id,
            sender,
        });

        tracing::info!(
            user_id,
            connection_id = %connection_id,
            connections = self.connection_count(),
            "Live connection opened"
        );

        Subscription {
            connection_id,
            user_id,
            receiver,
            hub: Arc::clone(self),
        }
    }

    fn unregister(&self, user_id: i64, connection_id: Uuid) {
        if let Some(mut subscribers) = self.connections.get_mut(&user_id) {
            subscribers.retain(|s| s.connection_id != connection_id);
        }
        self.connections.remove_if(&user_id, |_, subscribers| subscribers.is_empty());

        tracing::info!(user_id, connection_id = %connection_id, "Live connection closed");
    }

    /// Drop connections whose receiving side is gone.
    fn prune_closed(&self, user_id: i64) {
        if let Some(mut subscribers) = self.connections.get_mut(&user_id) {
            subscribers.retain(|s| !s.sender.is_closed());
        }
        self.connections.remove_if(&user_id, |_, subscribers| subscribers.is_empty());
    }

    /// Total number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|subscribers| !subscribers.is_empty())
    }

    /// Push `payload` to every connection of `user_id` without waiting.
    pub fn push(&self, user_id: i64, payload: &LivePayload) -> DeliveryOutcome {
        let mut delivered = 0;
        let mut saw_closed = false;

        if let Some(subscribers) = self.connections.get(&user_id) {
            for subscriber in subscribers.iter() {
                match subscriber.sender.try_send(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            user_id,
                            connection_id = %subscriber.connection_id,
                            notification_id = payload.id,
                            "Live connection lagging, payload dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            self.prune_closed(user_id);
        }

        if delivered == 0 {
            DeliveryOutcome::NoConnection
        } else {
            DeliveryOutcome::Delivered(delivered)
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[async_trait]
impl LiveDelivery for ConnectionHub {
    async fn send(&self, recipient_id: i64, payload: LivePayload) -> DeliveryOutcome {
        self.push(recipient_id, &payload)
    }
}

/// One open live connection of a user.
#[derive(Debug)]
pub struct Subscription {
    connection_id: Uuid,
    user_id: i64,
    receiver: mpsc::Receiver<LivePayload>,
    hub: Arc<ConnectionHub>,
}

impl Subscription {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Next payload pushed to this connection.
    pub async fn recv(&mut self) -> Option<LivePayload> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = LivePayload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.user_id, self.connection_id);
    }
}
