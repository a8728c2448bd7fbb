use crate::config::Config;
use crate::gateway::Gateway;
use std::sync::Arc;

/// Application context shared by every handler
#[derive(Clone)]
pub struct AppContext {
    pub gateway: Gateway,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn new(gateway: Gateway, config: Arc<Config>) -> Self {
        Self { gateway, config }
    }
}
