use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::notification::PushEngine;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub engine: PushEngine,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, engine: PushEngine) -> Self {
        Self {
            settings: Arc::new(settings),
            engine,
            start_time: Instant::now(),
        }
    }
}
