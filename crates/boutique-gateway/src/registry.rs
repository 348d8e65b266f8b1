use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use boutique_types::events::DeliveryMessage;
use boutique_types::models::UserId;

/// Opaque reference to one open notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(Uuid);

impl ChannelHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for ChannelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound queue feeding one connection's writer task.
pub type ChannelSender = mpsc::UnboundedSender<DeliveryMessage>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelHandle),

    #[error("channel {0} is not registered")]
    UnknownHandle(ChannelHandle),
}

/// Group-send seam between connections and the dispatcher.
///
/// [`ConnectionRegistry`] implements it in-process for a single node. A
/// broker-backed layer can stand in for multi-node deployments without the
/// dispatcher noticing.
#[async_trait]
pub trait ChannelLayer: Send + Sync {
    /// Make `handle` reachable under `recipient`.
    async fn register_channel(&self, recipient: UserId, handle: ChannelHandle, sender: ChannelSender);

    /// Returns false when the handle was not registered.
    async fn unregister_channel(&self, recipient: UserId, handle: ChannelHandle) -> bool;

    async fn lookup(&self, recipient: UserId) -> Vec<ChannelHandle>;

    async fn publish_to(
        &self,
        recipient: UserId,
        handle: ChannelHandle,
        message: DeliveryMessage,
    ) -> Result<(), DeliveryError>;
}

pub type SharedChannelLayer = Arc<dyn ChannelLayer>;

/// Tracks open notification channels per recipient.
///
/// A recipient may hold any number of channels (one per tab or device).
/// Cloning shares the same underlying map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    channels: Arc<RwLock<HashMap<UserId, HashMap<ChannelHandle, ChannelSender>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering an existing handle replaces its sender.
    pub async fn register(&self, recipient: UserId, handle: ChannelHandle, sender: ChannelSender) {
        self.channels
            .write()
            .await
            .entry(recipient)
            .or_default()
            .insert(handle, sender);
    }

    pub async fn unregister(&self, recipient: UserId, handle: ChannelHandle) -> bool {
        let mut channels = self.channels.write().await;
        let Some(handles) = channels.get_mut(&recipient) else {
            return false;
        };

        let removed = handles.remove(&handle).is_some();
        if handles.is_empty() {
            channels.remove(&recipient);
        }
        removed
    }

    pub async fn lookup(&self, recipient: UserId) -> Vec<ChannelHandle> {
        self.channels
            .read()
            .await
            .get(&recipient)
            .map(|handles| handles.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, recipient: UserId) -> usize {
        self.channels
            .read()
            .await
            .get(&recipient)
            .map_or(0, HashMap::len)
    }

    /// Recipients with at least one open channel.
    pub async fn online_recipients(&self) -> Vec<UserId> {
        self.channels.read().await.keys().copied().collect()
    }

    pub async fn send(
        &self,
        recipient: UserId,
        handle: ChannelHandle,
        message: DeliveryMessage,
    ) -> Result<(), DeliveryError> {
        let channels = self.channels.read().await;
        let tx = channels
            .get(&recipient)
            .and_then(|handles| handles.get(&handle))
            .ok_or(DeliveryError::UnknownHandle(handle))?;

        tx.send(message)
            .map_err(|_| DeliveryError::ChannelClosed(handle))
    }
}

#[async_trait]
impl ChannelLayer for ConnectionRegistry {
    async fn register_channel(&self, recipient: UserId, handle: ChannelHandle, sender: ChannelSender) {
        self.register(recipient, handle, sender).await;
    }

    async fn unregister_channel(&self, recipient: UserId, handle: ChannelHandle) -> bool {
        self.unregister(recipient, handle).await
    }

    async fn lookup(&self, recipient: UserId) -> Vec<ChannelHandle> {
        ConnectionRegistry::lookup(self, recipient).await
    }

    async fn publish_to(
        &self,
        recipient: UserId,
        handle: ChannelHandle,
        message: DeliveryMessage,
    ) -> Result<(), DeliveryError> {
        self.send(recipient, handle, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boutique_types::events::NotificationPayload;

    fn message(id: i64) -> DeliveryMessage {
        DeliveryMessage::notification(NotificationPayload {
            id,
            message: format!("n{id}"),
            notification_type: "info".into(),
            created_at: "2025-07-01T10:00:00.000000Z".into(),
        })
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        let handle = ChannelHandle::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(registry.lookup(1).await.is_empty());
        registry.register(1, handle, tx).await;
        assert_eq!(registry.lookup(1).await, vec![handle]);
        assert!(registry.lookup(2).await.is_empty());

        assert!(registry.unregister(1, handle).await);
        assert!(registry.lookup(1).await.is_empty());
        assert!(registry.online_recipients().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_register_and_unregister_are_harmless() {
        let registry = ConnectionRegistry::new();
        let keep = ChannelHandle::new();
        let churn = ChannelHandle::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(1, keep, tx.clone()).await;
        for _ in 0..3 {
            registry.register(1, churn, tx.clone()).await;
        }
        assert_eq!(registry.connection_count(1).await, 2);

        assert!(registry.unregister(1, churn).await);
        for _ in 0..5 {
            assert!(!registry.unregister(1, churn).await);
        }
        assert_eq!(registry.lookup(1).await, vec![keep]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_loses_nothing() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();

        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let handle = ChannelHandle::new();
                let (tx, _rx) = mpsc::unbounded_channel();
                registry.register(7, handle, tx).await;
                // Every other connection goes away again
                if i % 2 == 0 {
                    registry.unregister(7, handle).await;
                }
                handle
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(registry.connection_count(7).await, 32);
        let open = registry.lookup(7).await;
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(open.contains(handle), i % 2 == 1);
        }
    }

    #[tokio::test]
    async fn send_reports_closed_and_unknown_handles() {
        let registry = ConnectionRegistry::new();
        let handle = ChannelHandle::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(1, handle, tx).await;

        registry.send(1, handle, message(1)).await.unwrap();
        assert_eq!(rx.recv().await, Some(message(1)));

        drop(rx);
        assert!(matches!(
            registry.send(1, handle, message(2)).await,
            Err(DeliveryError::ChannelClosed(h)) if h == handle
        ));

        let stranger = ChannelHandle::new();
        assert!(matches!(
            registry.send(1, stranger, message(3)).await,
            Err(DeliveryError::UnknownHandle(_))
        ));
    }
}
