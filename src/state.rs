use crate::pending::PendingRequests;
use crate::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
/// Tests instantiate a fresh one per server; there is no global state.
#[derive(Clone)]
pub struct AppState {
    /// Active agent channels per user.
    pub registry: ConnectionRegistry,
    /// In-flight proxy requests awaiting correlated response frames.
    pub pending: PendingRequests,
    /// Expected `x-goog-api-key` value (from `AUTH_API_KEY`). `None` means
    /// the server is misconfigured and every proxy request is answered 500.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(api_key: Option<String>) -> Self {
        AppState {
            registry: ConnectionRegistry::new(),
            pending: PendingRequests::new(),
            api_key,
        }
    }
}
