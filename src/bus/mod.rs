//! Topic-keyed publish/subscribe bus.
//!
//! Each topic is backed by a `tokio::sync::broadcast` channel, so every
//! subscriber owns a bounded queue. Publishing never blocks: when a queue is
//! full the oldest message is overwritten and the subscriber is told how many
//! it lost on its next receive.
//!
//! Consumers that must see every message (persistence) subscribe with
//! [`MessageBus::subscribe_lossless`] instead, which queues without bound.

mod message;

pub use message::{BusMessage, ChatData, IntegrationRequest, RconMessage, Topic};

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct TopicChannel<M> {
    bounded: broadcast::Sender<M>,
    lossless: Vec<mpsc::UnboundedSender<M>>,
}

impl<M: Clone> TopicChannel<M> {
    fn new(capacity: usize) -> Self {
        Self {
            bounded: broadcast::channel(capacity).0,
            lossless: Vec::new(),
        }
    }

    fn subscriber_count(&self) -> usize {
        self.bounded.receiver_count() + self.lossless.iter().filter(|tx| !tx.is_closed()).count()
    }
}

/// Publish/subscribe hub keyed by topic name.
pub struct MessageBus<M: Clone + Send + 'static> {
    topics: RwLock<HashMap<String, TopicChannel<M>>>,
    capacity: usize,
}

impl<M: Clone + Send + 'static> MessageBus<M> {
    /// Create a bus whose subscribers each buffer up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish `message` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers the message was queued for. A topic
    /// nobody has subscribed to yet silently drops the message.
    pub fn publish(&self, topic: impl AsRef<str>, message: M) -> usize {
        let topics = self.topics.read();
        let Some(channel) = topics.get(topic.as_ref()) else {
            return 0;
        };
        let lossless = channel
            .lossless
            .iter()
            .filter(|tx| tx.send(message.clone()).is_ok())
            .count();
        lossless + channel.bounded.send(message).unwrap_or(0)
    }

    /// Subscribe to `topic`.
    ///
    /// Messages published after this call are delivered in publish order.
    /// The returned [`Canceller`] ends the subscription from any task.
    pub fn subscribe(&self, topic: impl AsRef<str>) -> (Subscription<M>, Canceller) {
        let topic = topic.as_ref();
        let rx = {
            // Fast path: the topic already exists
            if let Some(channel) = self.topics.read().get(topic) {
                channel.bounded.subscribe()
            } else {
                let mut topics = self.topics.write();
                topics
                    .entry(topic.to_string())
                    .or_insert_with(|| TopicChannel::new(self.capacity))
                    .bounded
                    .subscribe()
            }
        };
        Subscription::new(topic, Inbox::Bounded(rx))
    }

    /// Subscribe to `topic` without a queue bound.
    ///
    /// Nothing published after this call is ever dropped for this subscriber;
    /// the queue grows until the subscriber catches up.
    pub fn subscribe_lossless(&self, topic: impl AsRef<str>) -> (Subscription<M>, Canceller) {
        let topic = topic.as_ref();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut topics = self.topics.write();
            let channel = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicChannel::new(self.capacity));
            channel.lossless.retain(|tx| !tx.is_closed());
            channel.lossless.push(tx);
        }
        Subscription::new(topic, Inbox::Lossless(rx))
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: impl AsRef<str>) -> usize {
        self.topics
            .read()
            .get(topic.as_ref())
            .map_or(0, TopicChannel::subscriber_count)
    }
}

enum Inbox<M> {
    Bounded(broadcast::Receiver<M>),
    Lossless(mpsc::UnboundedReceiver<M>),
}

/// Receiving half of a topic subscription.
pub struct Subscription<M: Clone> {
    topic: String,
    inbox: Inbox<M>,
    token: CancellationToken,
}

impl<M: Clone> Subscription<M> {
    fn new(topic: &str, inbox: Inbox<M>) -> (Self, Canceller) {
        let token = CancellationToken::new();
        (
            Self {
                topic: topic.to_string(),
                inbox,
                token: token.clone(),
            },
            Canceller { token },
        )
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the subscription has been cancelled or the bus has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            if self.token.is_cancelled() {
                return None;
            }
            match &mut self.inbox {
                Inbox::Bounded(rx) => tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return None,
                    received = rx.recv() => match received {
                        Ok(message) => return Some(message),
                        Err(RecvError::Lagged(dropped)) => {
                            warn!(topic = %self.topic, dropped, "Subscriber queue overflowed, oldest messages dropped");
                        }
                        Err(RecvError::Closed) => return None,
                    },
                },
                Inbox::Lossless(rx) => tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return None,
                    received = rx.recv() => return received,
                },
            }
        }
    }

    /// Take whatever is already queued without waiting.
    ///
    /// Works after cancellation, so a consumer can flush its backlog on the
    /// way out.
    pub fn drain(&mut self) -> Vec<M> {
        let mut pending = Vec::new();
        match &mut self.inbox {
            Inbox::Bounded(rx) => loop {
                match rx.try_recv() {
                    Ok(message) => pending.push(message),
                    Err(TryRecvError::Lagged(dropped)) => {
                        warn!(topic = %self.topic, dropped, "Subscriber queue overflowed, oldest messages dropped");
                    }
                    Err(_) => break,
                }
            },
            Inbox::Lossless(rx) => {
                while let Ok(message) = rx.try_recv() {
                    pending.push(message);
                }
            }
        }
        pending
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Ends a subscription. Cancelling more than once is a no-op.
#[derive(Clone)]
pub struct Canceller {
    token: CancellationToken,
}

impl Canceller {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
