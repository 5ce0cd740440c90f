use std::sync::Arc;

use crate::services::{
    dispatcher::{Dispatcher, TaskBackend},
    job_store::JobStore,
    status::StatusResolver,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<StatusResolver>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher) -> Self {
        let backend = dispatcher.backend().distributed().cloned();
        let resolver = StatusResolver::new(Arc::clone(&store), backend);
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            resolver: Arc::new(resolver),
        }
    }

    pub fn backend(&self) -> &TaskBackend {
        self.dispatcher.backend()
    }
}
