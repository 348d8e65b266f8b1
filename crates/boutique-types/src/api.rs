use serde::{Deserialize, Serialize};

use crate::models::{Notification, UserId};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the notification gateway.
/// Tokens are minted by the storefront's login flow; this workspace only
/// verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub exp: usize,
    /// Backend services that raise notifications for other users.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub producer: bool,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNotificationRequest {
    pub recipient_id: UserId,
    pub message: String,
    pub notification_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateNotificationResponse {
    pub notification: Notification,
    /// Open channels that accepted the real-time push
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: u64,
}
