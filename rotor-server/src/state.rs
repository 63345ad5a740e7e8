use std::sync::Arc;

use rotor_core::{RotationStore, Rotator, SharedSettings};

/// Shared handles behind every request handler. Clone-cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RotationStore>,
    pub rotator: Rotator,
    pub settings: SharedSettings,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(store: Arc<dyn RotationStore>, settings: SharedSettings) -> Self {
        let rotator = Rotator::new(Arc::clone(&store), settings.clone());
        Self {
            store,
            rotator,
            settings,
        }
    }
}
