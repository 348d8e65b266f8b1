pub mod error;
pub mod middleware;
pub mod notifications;
pub mod state;
