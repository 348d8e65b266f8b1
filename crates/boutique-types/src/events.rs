use serde::{Deserialize, Serialize};

use crate::models::{Notification, NotificationId, format_timestamp};

/// Public fields of a notification as they travel over the wire.
///
/// `notification_type` and `created_at` stay as text so a pushed message is
/// forwarded exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: NotificationId,
    pub message: String,
    pub notification_type: String,
    pub created_at: String,
}

impl From<&Notification> for NotificationPayload {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            message: n.message.clone(),
            notification_type: n.kind.as_str().to_string(),
            created_at: format_timestamp(&n.created_at),
        }
    }
}

/// Frames written by the server to a notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryMessage {
    /// A notification pushed to the connected client
    Notification { notification: NotificationPayload },
}

impl DeliveryMessage {
    pub fn notification(payload: NotificationPayload) -> Self {
        Self::Notification {
            notification: payload,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&Notification> for DeliveryMessage {
    fn from(n: &Notification) -> Self {
        Self::notification(NotificationPayload::from(n))
    }
}

/// Frames sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelCommand {
    /// Authenticate a connection that did not present a token at upgrade
    Identify { token: String },

    /// Push instruction carrying a fully-formed message for this channel
    SendNotification { notification: NotificationPayload },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;
    use serde_json::json;

    #[test]
    fn outbound_frame_shape() {
        let notification = Notification {
            id: 7,
            recipient_id: 1,
            message: "Test notification".into(),
            kind: NotificationKind::Info,
            created_at: "2025-07-01T10:00:00.5Z".parse().unwrap(),
            is_read: false,
        };

        let value: serde_json::Value =
            serde_json::from_str(&DeliveryMessage::from(&notification).to_json().unwrap())
                .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "notification",
                "notification": {
                    "id": 7,
                    "message": "Test notification",
                    "notification_type": "info",
                    "created_at": "2025-07-01T10:00:00.500000Z"
                }
            })
        );
    }

    #[test]
    fn push_instruction_keeps_foreign_timestamp_text() {
        let raw = r#"{"type": "send_notification", "notification": {"id": 3, "message": "Test notification", "notification_type": "info", "created_at": "2025-07-01T12:00:00.123456+00:00"}}"#;
        let ChannelCommand::SendNotification { notification } =
            serde_json::from_str::<ChannelCommand>(raw).unwrap()
        else {
            panic!("expected send_notification");
        };
        assert_eq!(notification.created_at, "2025-07-01T12:00:00.123456+00:00");
        assert_eq!(notification.id, 3);
    }

    #[test]
    fn identify_and_unknown_commands() {
        let cmd: ChannelCommand =
            serde_json::from_str(r#"{"type":"identify","token":"abc"}"#).unwrap();
        assert_eq!(cmd, ChannelCommand::Identify { token: "abc".into() });

        assert!(serde_json::from_str::<ChannelCommand>(r#"{"type":"subscribe"}"#).is_err());
    }
}
