use std::sync::Arc;

use application::CoordinatorService;

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<CoordinatorService>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(coordinator: Arc<CoordinatorService>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }
}
