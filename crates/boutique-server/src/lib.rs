pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use boutique_api::middleware::require_auth;
use boutique_api::notifications;
use boutique_api::state::{AppState, AppStateInner};
use boutique_db::Database;
use boutique_gateway::auth::{TokenVerifier, bearer_token};
use boutique_gateway::connection::{self, ChannelOptions};
use boutique_gateway::dispatcher::Dispatcher;
use boutique_gateway::registry::{ConnectionRegistry, SharedChannelLayer};

/// Shared services wired together once at startup.
pub struct Services {
    pub state: AppState,
    pub registry: ConnectionRegistry,
}

pub fn services(db: Database, jwt_secret: &str) -> Services {
    let registry = ConnectionRegistry::new();
    let dispatcher = Dispatcher::new(Arc::new(registry.clone()));
    let state = Arc::new(AppStateInner {
        db,
        dispatcher,
        verifier: TokenVerifier::new(jwt_secret),
    });
    Services { state, registry }
}

#[derive(Clone)]
struct GatewayState {
    layer: SharedChannelLayer,
    verifier: TokenVerifier,
    options: ChannelOptions,
}

pub fn router(state: AppState, options: ChannelOptions) -> Router {
    let gateway = GatewayState {
        layer: state.dispatcher.layer().clone(),
        verifier: state.verifier.clone(),
        options,
    };

    let public_routes = Router::new().route("/health", get(notifications::health));

    let protected_routes = Router::new()
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let ws_route = Router::new()
        .route("/ws/notifications/", get(ws_upgrade))
        .route("/ws/notifications", get(ws_upgrade))
        .with_state(gateway);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// A token at upgrade (header or `?token=`) is checked before the handshake
/// and a bad one is refused with 401. Without one the socket is accepted and
/// must send `identify` first.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers).map(str::to_owned).or(query.token);

    let Some(token) = token else {
        return ws.on_upgrade(move |socket| {
            connection::handle_connection(socket, state.layer, state.verifier, state.options)
        });
    };

    match state.verifier.verify(&token) {
        Ok(claims) => ws.on_upgrade(move |socket| {
            connection::handle_connection_authenticated(socket, state.layer, claims, state.options)
        }),
        Err(e) => {
            warn!("notification channel upgrade refused: {}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
