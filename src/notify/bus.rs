use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::notify::{Notification, StreamEvent};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

struct Channel {
    sender: broadcast::Sender<Notification>,
    generation: u64,
}

#[derive(Default)]
struct Channels {
    by_feed: HashMap<String, Channel>,
    next_generation: u64,
}

/// Per-feed broadcast fan-out. Delivery is best-effort: publishing to a feed
/// nobody listens to drops the event.
pub struct NotificationBus {
    channels: Mutex<Channels>,
    capacity: usize,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(Channels::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        // The map holds no invariants a panicking holder could break.
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, recipient: &str, notification: Notification) -> usize {
        let channels = self.lock();
        let Some(channel) = channels.by_feed.get(recipient) else {
            debug!(feed = %recipient, kind = notification.kind(), "no subscribers, dropping");
            return 0;
        };
        channel.sender.send(notification).unwrap_or(0)
    }

    pub fn subscribe(self: &Arc<Self>, feed_url: &str) -> Subscription {
        let mut channels = self.lock();
        let (receiver, generation) = match channels.by_feed.get(feed_url) {
            Some(channel) => (channel.sender.subscribe(), channel.generation),
            None => {
                let generation = channels.next_generation;
                channels.next_generation += 1;
                let (sender, receiver) = broadcast::channel(self.capacity);
                channels
                    .by_feed
                    .insert(feed_url.to_string(), Channel { sender, generation });
                (receiver, generation)
            }
        };
        debug!(feed = %feed_url, "subscriber attached");

        Subscription {
            bus: Arc::clone(self),
            feed_url: feed_url.to_string(),
            generation,
            receiver,
            greeted: false,
        }
    }

    /// Close every subscription for `feed_url`.
    pub fn unsubscribe(&self, feed_url: &str) {
        if self.lock().by_feed.remove(feed_url).is_some() {
            debug!(feed = %feed_url, "channel closed");
        }
    }

    pub fn subscriber_count(&self, feed_url: &str) -> usize {
        self.lock()
            .by_feed
            .get(feed_url)
            .map(|c| c.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Called while the departing receiver is still alive, so it counts as one.
    fn release(&self, feed_url: &str, generation: u64) {
        let mut channels = self.lock();
        let last = channels
            .by_feed
            .get(feed_url)
            .is_some_and(|c| c.generation == generation && c.sender.receiver_count() <= 1);
        if last {
            channels.by_feed.remove(feed_url);
        }
    }
}

/// A live subscription to one feed's notifications. Dropping it detaches.
pub struct Subscription {
    bus: Arc<NotificationBus>,
    feed_url: String,
    generation: u64,
    receiver: broadcast::Receiver<Notification>,
    greeted: bool,
}

impl Subscription {
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    /// Next notification, or `None` once the channel is closed.
    /// Events missed because the subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(feed = %self.feed_url, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// First call yields `Connected`; afterwards a notification, or a
    /// heartbeat when nothing arrives within `keepalive`.
    pub async fn next_event(&mut self, keepalive: Duration) -> Option<StreamEvent> {
        if !self.greeted {
            self.greeted = true;
            return Some(StreamEvent::Connected {
                feed_url: self.feed_url.clone(),
            });
        }

        match tokio::time::timeout(keepalive, self.recv()).await {
            Ok(Some(notification)) => Some(StreamEvent::Notification(notification)),
            Ok(None) => None,
            Err(_) => Some(StreamEvent::Heartbeat {
                timestamp: Utc::now(),
            }),
        }
    }

    /// Consume the subscription as a stream of events.
    pub fn into_events(self, keepalive: Duration) -> impl Stream<Item = StreamEvent> {
        futures::stream::unfold(self, move |mut sub| async move {
            let event = sub.next_event(keepalive).await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.release(&self.feed_url, self.generation);
    }
}
