use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::notify::{NotificationBus, Outbound};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Message type for the dispatcher
#[derive(Debug)]
pub enum DispatchMessage {
    Deliver(Outbound),
    Shutdown,
}

/// Handle the sync engine uses to enqueue notifications.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatchMessage>,
}

impl DispatcherHandle {
    /// Never blocks; a full or closed queue drops the event with a warning.
    pub fn enqueue(&self, outbound: Outbound) {
        if let Err(e) = self.tx.try_send(DispatchMessage::Deliver(outbound)) {
            warn!("Dropping notification: {}", e);
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(DispatchMessage::Shutdown).await;
    }
}

/// Drains the outbound queue into the bus.
pub struct Dispatcher {
    bus: Arc<NotificationBus>,
    rx: mpsc::Receiver<DispatchMessage>,
}

impl Dispatcher {
    pub fn new(bus: Arc<NotificationBus>, capacity: usize) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { bus, rx }, DispatcherHandle { tx })
    }

    pub async fn run(mut self) {
        info!("Notification dispatcher started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                DispatchMessage::Deliver(outbound) => {
                    let delivered = self
                        .bus
                        .publish(&outbound.recipient, outbound.notification);
                    debug!(
                        feed = %outbound.recipient,
                        delivered,
                        "notification dispatched"
                    );
                }
                DispatchMessage::Shutdown => {
                    info!("Notification dispatcher shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn the dispatcher as a tokio task
pub fn spawn_dispatcher(bus: Arc<NotificationBus>, capacity: usize) -> DispatcherHandle {
    let (dispatcher, handle) = Dispatcher::new(bus, capacity);

    tokio::spawn(async move {
        dispatcher.run().await;
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notification;

    fn outbound(recipient: &str) -> Outbound {
        Outbound {
            recipient: recipient.into(),
            notification: Notification::Reply {
                post: "https://b.org/social.org#2".into(),
                parent: format!("{}#1", recipient),
            },
        }
    }

    #[tokio::test]
    async fn test_dispatcher_forwards_to_bus() {
        let bus = Arc::new(NotificationBus::default());
        let mut sub = bus.subscribe("https://a.org/social.org");
        let handle = spawn_dispatcher(bus.clone(), 16);

        handle.enqueue(outbound("https://a.org/social.org"));
        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind(), "reply");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let bus = Arc::new(NotificationBus::default());
        let (dispatcher, handle) = Dispatcher::new(bus, 1);

        handle.enqueue(outbound("https://a.org/social.org"));
        handle.enqueue(outbound("https://a.org/social.org"));
        drop(dispatcher);
        handle.enqueue(outbound("https://a.org/social.org"));
    }
}
