use std::sync::Arc;

use boutique_db::Database;
use boutique_gateway::auth::TokenVerifier;
use boutique_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub verifier: TokenVerifier,
}
