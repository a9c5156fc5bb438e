use std::sync::Arc;

use application::Realtime;

#[derive(Clone)]
pub struct AppState {
    pub realtime: Arc<Realtime>,
}

impl AppState {
    pub fn new(realtime: Arc<Realtime>) -> Self {
        Self { realtime }
    }
}
