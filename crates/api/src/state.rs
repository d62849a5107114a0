//! Shared application state

use std::sync::Arc;

use crate::config::Config;
use crate::service::ConversationService;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversationService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(service: ConversationService, config: Config) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}
