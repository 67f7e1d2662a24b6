use std::sync::Arc;

use crate::config::Config;
use crate::pool::AccountPool;
use crate::proxy::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub upstream: Arc<UpstreamClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(pool: Arc<AccountPool>, upstream: Arc<UpstreamClient>, config: Arc<Config>) -> Self {
        AppState {
            pool,
            upstream,
            config,
        }
    }
}
