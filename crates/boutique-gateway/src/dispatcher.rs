use tracing::{debug, warn};

use boutique_types::events::DeliveryMessage;
use boutique_types::models::Notification;

use crate::registry::SharedChannelLayer;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes freshly stored notifications to every open channel of their
/// recipient. Delivery is best-effort; the store stays the system of record.
#[derive(Clone)]
pub struct Dispatcher {
    layer: SharedChannelLayer,
}

impl Dispatcher {
    pub fn new(layer: SharedChannelLayer) -> Self {
        Self { layer }
    }

    pub fn layer(&self) -> &SharedChannelLayer {
        &self.layer
    }

    pub async fn dispatch(&self, notification: &Notification) -> DispatchReport {
        let recipient = notification.recipient_id;
        let handles = self.layer.lookup(recipient).await;
        let mut report = DispatchReport::default();

        if handles.is_empty() {
            debug!(
                "user {} has no open channels, notification {} left in store",
                recipient, notification.id
            );
            return report;
        }

        let message = DeliveryMessage::from(notification);
        for handle in handles {
            match self.layer.publish_to(recipient, handle, message.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    // One dead channel never blocks the rest
                    warn!("notification {} to user {}: {}", notification.id, recipient, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "notification {} fanned out to user {}: {} delivered, {} failed",
            notification.id, recipient, report.delivered, report.failed
        );
        report
    }
}
