use std::sync::Arc;

use cache::PresenceCache;
use config::Config;
use database::LocationStore;
use fanout::LocationFanOut;
use matcher::ProximityMatcher;

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod fanout;
pub mod matcher;
pub mod models;
pub mod routes;
pub mod utils;

/// 进程内共享状态，各存储以 trait 对象注入
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LocationStore>,
    pub presence: Arc<dyn PresenceCache>,
    pub fanout: Arc<dyn LocationFanOut>,
    pub matcher: ProximityMatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LocationStore>,
        presence: Arc<dyn PresenceCache>,
        fanout: Arc<dyn LocationFanOut>,
    ) -> Self {
        let matcher = ProximityMatcher::new(
            presence.clone(),
            store.clone(),
            config.destination_tolerance,
            config.presence_ttl(),
        );
        Self {
            config,
            store,
            presence,
            fanout,
            matcher,
        }
    }
}
