use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::{info, warn};

use boutique_gateway::dispatcher::DispatchReport;
use boutique_types::api::{
    Claims, CreateNotificationRequest, CreateNotificationResponse, UnreadCountResponse,
};
use boutique_types::models::{Notification, NotificationId, NotificationKind, UserId};

use crate::error::ApiError;
use crate::state::{AppState, AppStateInner};

/// Store a notification, then push it to the recipient's open channels.
///
/// Entry point for application events (order placed, stock warnings, ...).
/// The push is best-effort; once this returns Ok the notification is durable.
pub async fn publish(
    state: &AppState,
    recipient: UserId,
    message: String,
    kind: NotificationKind,
) -> Result<(Notification, DispatchReport), ApiError> {
    // Run blocking DB insert off the async runtime
    let db = state.clone();
    let notification = tokio::task::spawn_blocking(move || {
        db.db.create_notification(recipient, &message, kind)
    })
    .await??;

    let report = state.dispatcher.dispatch(&notification).await;
    info!(
        "notification {} ({}) for user {}: pushed to {} channel(s)",
        notification.id, notification.kind, recipient, report.delivered
    );
    Ok((notification, report))
}

/// Customers may only notify themselves; other recipients need a producer token.
pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.recipient_id != claims.sub && !claims.producer {
        warn!("{} ({}) tried to notify user {} without producer rights", claims.username, claims.sub, req.recipient_id);
        return Err(ApiError::Forbidden("producer token required".into()));
    }
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let kind = req
        .notification_type
        .parse::<NotificationKind>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!("{} ({}) publishing to user {}", claims.username, claims.sub, req.recipient_id);
    let (notification, report) = publish(&state, req.recipient_id, req.message, kind).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationResponse {
            notification,
            delivered: report.delivered,
            failed: report.failed,
        }),
    ))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let notifications =
        blocking(&state, move |inner| inner.db.list_notifications(claims.sub)).await?;
    Ok(Json(notifications))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread = blocking(&state, move |inner| inner.db.unread_count(claims.sub)).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

/// Mark one of the caller's notifications as read. Someone else's
/// notification is reported as missing.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<NotificationId>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let owner = claims.sub;
    blocking(&state, move |inner| -> Result<(), ApiError> {
        match inner.db.get_notification(id)? {
            Some(n) if n.recipient_id == owner => {}
            _ => return Err(ApiError::NotFound),
        }
        inner.db.mark_read(id)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Run a store call on the blocking pool.
async fn blocking<F, T, E>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    let inner = state.clone();
    tokio::task::spawn_blocking(move || f(&inner).map_err(Into::into)).await?
}
