use crate::{config::Config, engine::OrderBookEngine, store::Store};
use std::{
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Instant,
};

/// Shared handle to the single engine instance.
///
/// Mutations take the write lock for their whole check-then-write sequence;
/// queries share the read lock and see a consistent snapshot.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<OrderBookEngine>>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            engine: Arc::new(RwLock::new(OrderBookEngine::new(Store::new()))),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    // A poisoned lock means the engine panicked on a broken invariant.
    pub fn read(&self) -> RwLockReadGuard<'_, OrderBookEngine> {
        self.engine.read().expect("engine lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, OrderBookEngine> {
        self.engine.write().expect("engine lock poisoned")
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new(Config::default())
    }
}
