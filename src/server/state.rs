use axum::extract::FromRef;

use crate::batch::BatchScheduler;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedBatchScheduler = Arc<BatchScheduler>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub scheduler: GuardedBatchScheduler,
}

impl ServerState {
    pub fn new(config: ServerConfig, scheduler: GuardedBatchScheduler) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            scheduler,
        }
    }
}

impl FromRef<ServerState> for GuardedBatchScheduler {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
